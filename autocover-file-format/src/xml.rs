// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::io::Write;
use std::str::FromStr;

use anyhow::{format_err, Context, Result};
use quick_xml::events::BytesStart;
use quick_xml::Writer;

pub(crate) trait WriteXml {
    fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> quick_xml::Result<()>;
}

impl<T> WriteXml for Vec<T>
where
    T: WriteXml,
{
    fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> quick_xml::Result<()> {
        for value in self {
            value.write_xml(writer)?;
        }

        Ok(())
    }
}

/// Render `value` as an indented XML document.
pub(crate) fn to_string(value: &impl WriteXml) -> Result<String> {
    use quick_xml::events::{BytesDecl, Event};

    let mut data = Vec::new();
    let mut writer = Writer::new_with_indent(&mut data, b' ', 2);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    value.write_xml(&mut writer)?;

    let text = String::from_utf8(data)?;
    Ok(text)
}

/// Unescaped attributes of an element, keyed by local name.
pub(crate) struct Attributes {
    element: String,
    values: HashMap<String, String>,
}

impl Attributes {
    pub fn new(e: &BytesStart) -> Result<Self> {
        let element = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
        let mut values = HashMap::new();

        for attr in e.attributes() {
            let attr = attr?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            values.insert(key, value);
        }

        Ok(Self { element, values })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(|v| v.as_str())
    }

    pub fn required(&self, name: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| format_err!("<{}> is missing attribute `{}`", self.element, name))
    }

    pub fn parse<T>(&self, name: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        let text = self.required(name)?;
        text.trim()
            .parse()
            .with_context(|| format!("invalid `{}` in <{}>: {}", name, self.element, text))
    }

    pub fn parse_or<T>(&self, name: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        if self.get(name).is_some() {
            self.parse(name)
        } else {
            Ok(default)
        }
    }
}
