//! JUnit XML reports, as written by Surefire and most other test runners.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JunitParseError {
    #[error("malformed XML at byte {position}: {message}")]
    Xml { position: u64, message: String },

    #[error("report ends inside <{0}>")]
    Truncated(String),

    #[error("no <testsuite> element found")]
    MissingSuite,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum CaseStatus {
    Passed,
    Failed,
    Error,
    Skipped,
    /// Expected by the rubric but absent from every report. Never produced by the parser.
    Missing,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "Passed",
            Self::Failed => "Failed",
            Self::Error => "Error",
            Self::Skipped => "Skipped",
            Self::Missing => "Missing",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ParsedTestCase {
    pub class_name: String,
    pub name: String,
    pub status: CaseStatus,
    /// `message` attribute of the failure, error or skipped marker.
    pub message: Option<String>,
    /// Body of the failure, error or skipped marker, usually a stack trace.
    pub details: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl ParsedTestCase {
    pub fn new(class_name: impl Into<String>, name: impl Into<String>, status: CaseStatus) -> Self {
        Self {
            class_name: class_name.into(),
            name: name.into(),
            status,
            message: None,
            details: None,
            stdout: None,
            stderr: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ParsedTestSuite {
    /// Suite name; the test class for Surefire reports.
    pub name: String,
    pub cases: Vec<ParsedTestCase>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Capture {
    Marker,
    Stdout,
    Stderr,
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, quick_xml::Error> {
    for attribute in e.attributes() {
        let attribute = attribute?;
        if attribute.key.as_ref() == key {
            return Ok(Some(attribute.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn append(slot: &mut Option<String>, text: &str) {
    match slot {
        Some(existing) => existing.push_str(text),
        None => *slot = Some(text.to_string()),
    }
}

#[derive(Default)]
struct ReportParser {
    suites: Vec<ParsedTestSuite>,
    open_suites: Vec<ParsedTestSuite>,
    case: Option<ParsedTestCase>,
    capture: Option<Capture>,
}

impl ReportParser {
    fn open(&mut self, e: &BytesStart<'_>, empty: bool) -> Result<(), quick_xml::Error> {
        match e.local_name().as_ref() {
            b"testsuite" => {
                self.open_suites.push(ParsedTestSuite {
                    name: attr(e, b"name")?.unwrap_or_default(),
                    cases: Vec::new(),
                });
                if empty {
                    self.close(b"testsuite");
                }
            }
            b"testcase" => {
                let suite_name = self
                    .open_suites
                    .last()
                    .map(|s| s.name.clone())
                    .unwrap_or_default();
                let class_name = attr(e, b"classname")?.unwrap_or(suite_name);
                let name = attr(e, b"name")?.unwrap_or_default();
                self.case = Some(ParsedTestCase::new(class_name, name, CaseStatus::Passed));
                if empty {
                    self.close(b"testcase");
                }
            }
            marker @ (b"failure" | b"error" | b"skipped") => {
                let status = match marker {
                    b"failure" => CaseStatus::Failed,
                    b"error" => CaseStatus::Error,
                    _ => CaseStatus::Skipped,
                };
                let message = attr(e, b"message")?;
                if let Some(case) = self.case.as_mut() {
                    // The first marker decides the status.
                    if case.status == CaseStatus::Passed {
                        case.status = status;
                        case.message = message;
                        if !empty {
                            self.capture = Some(Capture::Marker);
                        }
                    }
                }
            }
            b"system-out" if self.case.is_some() && !empty => self.capture = Some(Capture::Stdout),
            b"system-err" if self.case.is_some() && !empty => self.capture = Some(Capture::Stderr),
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self, name: &[u8]) {
        match name {
            b"testsuite" => {
                if let Some(suite) = self.open_suites.pop() {
                    self.suites.push(suite);
                }
            }
            b"testcase" => {
                self.capture = None;
                if let (Some(case), Some(suite)) = (self.case.take(), self.open_suites.last_mut()) {
                    suite.cases.push(case);
                }
            }
            b"failure" | b"error" | b"skipped" | b"system-out" | b"system-err" => {
                self.capture = None;
            }
            _ => {}
        }
    }

    fn text(&mut self, text: &str) {
        let (Some(capture), Some(case)) = (self.capture, self.case.as_mut()) else {
            return;
        };
        match capture {
            Capture::Marker => append(&mut case.details, text),
            Capture::Stdout => append(&mut case.stdout, text),
            Capture::Stderr => append(&mut case.stderr, text),
        }
    }
}

/// Parse every `<testsuite>` in a report, whether it is the root element or
/// nested in `<testsuites>`.
pub fn parse_suites(xml: &[u8]) -> Result<Vec<ParsedTestSuite>, JunitParseError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut parser = ReportParser::default();
    let mut open: Vec<Vec<u8>> = Vec::new();
    let mut buf = Vec::new();

    let malformed = |reader: &Reader<&[u8]>, e: quick_xml::Error| JunitParseError::Xml {
        position: reader.buffer_position() as u64,
        message: e.to_string(),
    };

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                parser.open(&e, false).map_err(|err| malformed(&reader, err))?;
                open.push(e.local_name().as_ref().to_vec());
            }
            Ok(Event::Empty(e)) => {
                parser.open(&e, true).map_err(|err| malformed(&reader, err))?;
            }
            Ok(Event::End(e)) => {
                open.pop();
                parser.close(e.local_name().as_ref());
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|err| malformed(&reader, err))?;
                parser.text(&text);
            }
            Ok(Event::CData(c)) => {
                let text = String::from_utf8_lossy(&c).into_owned();
                parser.text(&text);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(malformed(&reader, e)),
        }
        buf.clear();
    }

    if let Some(unclosed) = open.last() {
        return Err(JunitParseError::Truncated(
            String::from_utf8_lossy(unclosed).into_owned(),
        ));
    }
    if parser.suites.is_empty() {
        return Err(JunitParseError::MissingSuite);
    }
    Ok(parser.suites)
}

/// Parse a single-suite report such as `TEST-com.example.FooTest.xml`.
pub fn parse(xml: &[u8]) -> Result<ParsedTestSuite, JunitParseError> {
    parse_suites(xml)?
        .into_iter()
        .next()
        .ok_or(JunitParseError::MissingSuite)
}
