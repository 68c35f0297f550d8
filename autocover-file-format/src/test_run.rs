// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Test-run reports in the TRX layout.
//!
//! Only `UnitTestResult` elements are read. For failed tests the message is the
//! text of the first `Output/ErrorInfo/Message` child.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{bail, Context, Result};
use coverage::{Outcome, TestId};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::xml::Attributes;

const FAILED: &str = "Failed";
const RESULT: &[u8] = b"UnitTestResult";
const MESSAGE_PATH: [&[u8]; 3] = [b"Output", b"ErrorInfo", b"Message"];

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnitTestResult {
    pub test_id: Option<String>,
    pub test_name: String,
    pub outcome: String,
    pub message: Option<String>,
}

impl UnitTestResult {
    pub fn is_failed(&self) -> bool {
        self.outcome == FAILED
    }

    /// The stable id of the test.
    ///
    /// Uses the reported `testId` when it is a well-formed id, otherwise derives
    /// the id from the test name.
    pub fn id(&self) -> TestId {
        self.test_id
            .as_deref()
            .and_then(|id| id.parse().ok())
            .unwrap_or_else(|| TestId::from_name(&self.test_name))
    }

    pub fn outcome(&self) -> Outcome {
        if self.is_failed() {
            Outcome::failed(&self.test_name, self.message.clone())
        } else {
            Outcome::passed(&self.test_name)
        }
    }

    fn from_attributes(attrs: &Attributes) -> Result<Self> {
        Ok(Self {
            test_id: attrs.get("testId").map(str::to_owned),
            test_name: attrs.required("testName")?.to_owned(),
            outcome: attrs.get("outcome").unwrap_or_default().to_owned(),
            message: None,
        })
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TestRun {
    pub results: Vec<UnitTestResult>,
}

impl TestRun {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("opening test run report: {}", path.display()))?;

        Self::read(BufReader::new(file))
            .with_context(|| format!("parsing test run report: {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Self::read(text.as_bytes())
    }

    pub fn read(reader: impl BufRead) -> Result<Self> {
        let mut reader = Reader::from_reader(reader);
        reader.trim_text(true);

        let mut run = TestRun::default();
        let mut current: Option<UnitTestResult> = None;

        // Element path below the current `UnitTestResult`.
        let mut path: Vec<Vec<u8>> = vec![];
        let mut message: Option<String> = None;
        let mut message_done = false;

        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) if e.local_name().as_ref() == RESULT => {
                    if current.is_some() {
                        bail!("nested <UnitTestResult> elements are not supported");
                    }

                    current = Some(UnitTestResult::from_attributes(&Attributes::new(&e)?)?);
                    path.clear();
                    message = None;
                    message_done = false;
                }
                Event::Empty(e) if e.local_name().as_ref() == RESULT => {
                    let result = UnitTestResult::from_attributes(&Attributes::new(&e)?)?;
                    run.results.push(result);
                }
                Event::End(e) if e.local_name().as_ref() == RESULT => {
                    if let Some(mut result) = current.take() {
                        if result.is_failed() {
                            result.message = message.take();
                        }
                        run.results.push(result);
                    }
                }
                Event::Start(e) if current.is_some() => {
                    path.push(e.local_name().as_ref().to_vec());
                }
                Event::End(_) if current.is_some() => {
                    if path.iter().map(|p| p.as_slice()).eq(MESSAGE_PATH) && message.is_some() {
                        message_done = true;
                    }
                    path.pop();
                }
                Event::Text(e) if current.is_some() && !message_done => {
                    if path.iter().map(|p| p.as_slice()).eq(MESSAGE_PATH) {
                        message
                            .get_or_insert_with(String::new)
                            .push_str(&e.unescape()?);
                    }
                }
                Event::CData(e) if current.is_some() && !message_done => {
                    if path.iter().map(|p| p.as_slice()).eq(MESSAGE_PATH) {
                        message
                            .get_or_insert_with(String::new)
                            .push_str(&String::from_utf8_lossy(&e.into_inner()));
                    }
                }
                Event::Eof => break,
                _ => {}
            }

            buf.clear();
        }

        if current.is_some() {
            bail!("unterminated <UnitTestResult> element");
        }

        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_id_falls_back_to_name() {
        let mut result = UnitTestResult {
            test_id: Some("not-a-guid".to_owned()),
            test_name: "Foo.Bar.Baz".to_owned(),
            outcome: "Passed".to_owned(),
            message: None,
        };

        assert_eq!(result.id(), TestId::from_name("Foo.Bar.Baz"));

        let id = TestId::from_name("Something.Else.Entirely");
        result.test_id = Some(id.to_string());
        assert_eq!(result.id(), id);
    }

    #[test]
    fn test_only_first_message_is_kept() -> Result<()> {
        let text = r#"<TestRun><Results>
            <UnitTestResult testName="Baz" outcome="Failed">
              <Output>
                <ErrorInfo><Message>first</Message></ErrorInfo>
                <ErrorInfo><Message>second</Message></ErrorInfo>
              </Output>
            </UnitTestResult>
        </Results></TestRun>"#;

        let run = TestRun::parse(text)?;
        assert_eq!(run.results.len(), 1);
        assert_eq!(run.results[0].message.as_deref(), Some("first"));

        Ok(())
    }

    #[test]
    fn test_passed_test_has_no_message() -> Result<()> {
        let text = r#"<TestRun><Results>
            <UnitTestResult testName="Baz" outcome="Passed">
              <Output><ErrorInfo><Message>ignored</Message></ErrorInfo></Output>
            </UnitTestResult>
        </Results></TestRun>"#;

        let run = TestRun::parse(text)?;
        assert_eq!(run.results[0].message, None);
        assert_eq!(run.results[0].outcome(), Outcome::passed("Baz"));

        Ok(())
    }

    #[test]
    fn test_missing_test_name_is_rejected() {
        let text = r#"<TestRun><Results><UnitTestResult outcome="Passed"/></Results></TestRun>"#;
        assert!(TestRun::parse(text).is_err());
    }
}
