// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The base coverage report written by the instrumentor.
//!
//! ```xml
//! <coverage>
//!   <module moduleId="..." name="Widgets.dll">
//!     <method name="Turn" class="Widgets.Gear">
//!       <seqpnt visitcount="0" line="5" column="9" endline="5" endcolumn="30" document="Gear.cs" />
//!     </method>
//!   </module>
//! </coverage>
//! ```
//!
//! Sequence points are numbered from 1 in document order within their module,
//! whatever elements they are nested in. That number is the point index passed to
//! `Hit(moduleId, pointIndex)` by instrumented code.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use coverage::CodeBlock;
use quick_xml::events::Event;
use quick_xml::{Reader, Writer};

use crate::xml::{Attributes, WriteXml};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SequencePoint {
    pub line: u32,
    pub column: u32,
    pub end_line: u32,
    pub end_column: u32,
    pub document: String,
    pub visit_count: u32,
}

impl SequencePoint {
    pub fn block(&self) -> Result<CodeBlock> {
        CodeBlock::new(self.line, self.column, self.end_line, self.end_column)
    }

    fn from_attributes(attrs: &Attributes) -> Result<Self> {
        Ok(Self {
            line: attrs.parse("line")?,
            column: attrs.parse("column")?,
            end_line: attrs.parse("endline")?,
            end_column: attrs.parse("endcolumn")?,
            document: attrs.required("document")?.to_owned(),
            visit_count: attrs.parse_or("visitcount", 0)?,
        })
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ModuleCoverage {
    pub module_id: String,
    pub name: Option<String>,

    /// In declaration order. Point index `n` is `points[n - 1]`.
    pub points: Vec<SequencePoint>,
}

impl ModuleCoverage {
    /// Look up a 1-based point index.
    pub fn point(&self, index: u32) -> Option<&SequencePoint> {
        let index = usize::try_from(index).ok()?.checked_sub(1)?;
        self.points.get(index)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BaseReport {
    pub modules: Vec<ModuleCoverage>,
}

impl BaseReport {
    pub fn module(&self, module_id: &str) -> Option<&ModuleCoverage> {
        self.modules.iter().find(|m| m.module_id == module_id)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("opening base coverage report: {}", path.display()))?;

        Self::read(BufReader::new(file))
            .with_context(|| format!("parsing base coverage report: {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Self::read(text.as_bytes())
    }

    pub fn read(reader: impl BufRead) -> Result<Self> {
        let mut reader = Reader::from_reader(reader);
        reader.trim_text(true);

        let mut report = BaseReport::default();
        let mut current: Option<ModuleCoverage> = None;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) if e.local_name().as_ref() == b"module" => {
                    let attrs = Attributes::new(&e)?;

                    if current.is_some() {
                        bail!("nested <module> elements are not supported");
                    }

                    current = Some(ModuleCoverage {
                        module_id: attrs.required("moduleId")?.to_owned(),
                        name: attrs.get("name").map(str::to_owned),
                        points: vec![],
                    });
                }
                Event::Empty(e) if e.local_name().as_ref() == b"module" => {
                    let attrs = Attributes::new(&e)?;

                    report.modules.push(ModuleCoverage {
                        module_id: attrs.required("moduleId")?.to_owned(),
                        name: attrs.get("name").map(str::to_owned),
                        points: vec![],
                    });
                }
                Event::End(e) if e.local_name().as_ref() == b"module" => {
                    if let Some(module) = current.take() {
                        report.modules.push(module);
                    }
                }
                Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"seqpnt" => {
                    let attrs = Attributes::new(&e)?;
                    let point = SequencePoint::from_attributes(&attrs)?;

                    match &mut current {
                        Some(module) => module.points.push(point),
                        None => bail!("<seqpnt> outside of a <module>"),
                    }
                }
                Event::Eof => break,
                _ => {}
            }

            buf.clear();
        }

        if current.is_some() {
            bail!("unterminated <module> element");
        }

        Ok(report)
    }

    pub fn to_string(&self) -> Result<String> {
        crate::xml::to_string(self)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = self.to_string()?;
        std::fs::write(path, text)
            .with_context(|| format!("writing base coverage report: {}", path.display()))?;

        Ok(())
    }
}

impl WriteXml for BaseReport {
    fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> quick_xml::Result<()> {
        writer
            .create_element("coverage")
            .write_inner_content(|w| self.modules.write_xml(w))?;

        Ok(())
    }
}

impl WriteXml for ModuleCoverage {
    fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> quick_xml::Result<()> {
        let mut element = writer
            .create_element("module")
            .with_attribute(("moduleId", self.module_id.as_str()));

        if let Some(name) = &self.name {
            element = element.with_attribute(("name", name.as_str()));
        }

        element.write_inner_content(|w| self.points.write_xml(w))?;

        Ok(())
    }
}

impl WriteXml for SequencePoint {
    fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> quick_xml::Result<()> {
        writer
            .create_element("seqpnt")
            .with_attributes([
                ("visitcount", self.visit_count.to_string().as_str()),
                ("line", self.line.to_string().as_str()),
                ("column", self.column.to_string().as_str()),
                ("endline", self.end_line.to_string().as_str()),
                ("endcolumn", self.end_column.to_string().as_str()),
                ("document", self.document.as_str()),
            ])
            .write_empty()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_point_index_is_one_based() {
        let point = |line| SequencePoint {
            line,
            column: 1,
            end_line: line,
            end_column: 2,
            document: "A.cs".to_owned(),
            visit_count: 0,
        };

        let module = ModuleCoverage {
            module_id: "m".to_owned(),
            name: None,
            points: vec![point(10), point(20)],
        };

        assert_eq!(module.point(0), None);
        assert_eq!(module.point(1).map(|p| p.line), Some(10));
        assert_eq!(module.point(2).map(|p| p.line), Some(20));
        assert_eq!(module.point(3), None);
    }

    #[test]
    fn test_seqpnt_outside_module_is_rejected() {
        let text = r#"<coverage><seqpnt line="1" column="1" endline="1" endcolumn="2" document="A.cs"/></coverage>"#;
        assert!(BaseReport::parse(text).is_err());
    }

    #[test]
    fn test_missing_attribute_is_rejected() {
        let text = r#"<coverage><module moduleId="m"><seqpnt line="1" column="1" endline="1" document="A.cs"/></module></coverage>"#;
        let err = BaseReport::parse(text).err().map(|e| e.to_string());
        assert_eq!(
            err.as_deref(),
            Some("<seqpnt> is missing attribute `endcolumn`")
        );
    }
}
