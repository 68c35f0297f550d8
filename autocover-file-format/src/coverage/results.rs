// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The hit-results file merged by instrumented test hosts.
//!
//! ```xml
//! <results>
//!   <seqpnt line="5" column="9" endline="10" endcolumn="10" document="Gear.cs">
//!     <test name="Widgets.Tests.GearTests.Turns" />
//!   </seqpnt>
//! </results>
//! ```
//!
//! Only points hit by at least one test are listed.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use coverage::CodeBlock;
use quick_xml::events::Event;
use quick_xml::{Reader, Writer};

use crate::xml::{Attributes, WriteXml};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HitPoint {
    pub line: u32,
    pub column: u32,
    pub end_line: u32,
    pub end_column: u32,
    pub document: String,
    pub tests: BTreeSet<String>,
}

type PointKey = (String, u32, u32, u32, u32);

impl HitPoint {
    pub fn block(&self) -> Result<CodeBlock> {
        CodeBlock::new(self.line, self.column, self.end_line, self.end_column)
    }

    fn key(&self) -> PointKey {
        (
            self.document.clone(),
            self.line,
            self.column,
            self.end_line,
            self.end_column,
        )
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HitResults {
    pub points: Vec<HitPoint>,
}

impl HitResults {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Union `other` into `self`.
    ///
    /// Points are identified by document and exact span. Existing points keep
    /// their position, new ones are appended.
    pub fn merge(&mut self, other: HitResults) {
        let mut index: HashMap<PointKey, usize> = self
            .points
            .iter()
            .enumerate()
            .map(|(i, p)| (p.key(), i))
            .collect();

        for point in other.points {
            match index.get(&point.key()) {
                Some(&i) => self.points[i].tests.extend(point.tests),
                None => {
                    index.insert(point.key(), self.points.len());
                    self.points.push(point);
                }
            }
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("opening hit results: {}", path.display()))?;

        Self::read(BufReader::new(file))
            .with_context(|| format!("parsing hit results: {}", path.display()))
    }

    /// Load `path`, or `None` if it does not exist.
    pub fn load_existing(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();

        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("opening hit results: {}", path.display())
                })
            }
        };

        let results = Self::read(BufReader::new(file))
            .with_context(|| format!("parsing hit results: {}", path.display()))?;

        Ok(Some(results))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Self::read(text.as_bytes())
    }

    pub fn read(reader: impl BufRead) -> Result<Self> {
        let mut reader = Reader::from_reader(reader);
        reader.trim_text(true);

        let mut results = HitResults::default();
        let mut current: Option<HitPoint> = None;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) if e.local_name().as_ref() == b"seqpnt" => {
                    if current.is_some() {
                        bail!("nested <seqpnt> elements are not supported");
                    }

                    current = Some(parse_point(&Attributes::new(&e)?)?);
                }
                Event::Empty(e) if e.local_name().as_ref() == b"seqpnt" => {
                    // A point with no tests carries no hits.
                    parse_point(&Attributes::new(&e)?)?;
                }
                Event::End(e) if e.local_name().as_ref() == b"seqpnt" => {
                    if let Some(point) = current.take() {
                        if !point.tests.is_empty() {
                            results.points.push(point);
                        }
                    }
                }
                Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"test" => {
                    let attrs = Attributes::new(&e)?;
                    let name = attrs.required("name")?;

                    match &mut current {
                        Some(point) => {
                            point.tests.insert(name.to_owned());
                        }
                        None => bail!("<test> outside of a <seqpnt>: {}", name),
                    }
                }
                Event::Eof => break,
                _ => {}
            }

            buf.clear();
        }

        if current.is_some() {
            bail!("unterminated <seqpnt> element");
        }

        Ok(results)
    }

    pub fn to_string(&self) -> Result<String> {
        crate::xml::to_string(self)
    }
}

fn parse_point(attrs: &Attributes) -> Result<HitPoint> {
    Ok(HitPoint {
        line: attrs.parse("line")?,
        column: attrs.parse("column")?,
        end_line: attrs.parse("endline")?,
        end_column: attrs.parse("endcolumn")?,
        document: attrs.required("document")?.to_owned(),
        tests: BTreeSet::new(),
    })
}

impl WriteXml for HitResults {
    fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> quick_xml::Result<()> {
        if self.points.is_empty() {
            writer.create_element("results").write_empty()?;
        } else {
            writer
                .create_element("results")
                .write_inner_content(|w| self.points.write_xml(w))?;
        }

        Ok(())
    }
}

impl WriteXml for HitPoint {
    fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> quick_xml::Result<()> {
        writer
            .create_element("seqpnt")
            .with_attributes([
                ("line", self.line.to_string().as_str()),
                ("column", self.column.to_string().as_str()),
                ("endline", self.end_line.to_string().as_str()),
                ("endcolumn", self.end_column.to_string().as_str()),
                ("document", self.document.as_str()),
            ])
            .write_inner_content(|w| {
                for test in &self.tests {
                    w.create_element("test")
                        .with_attribute(("name", test.as_str()))
                        .write_empty()?;
                }

                Ok(())
            })?;

        Ok(())
    }
}
