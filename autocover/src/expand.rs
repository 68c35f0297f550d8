// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use strum::IntoEnumIterator;
use strum_macros::EnumIter;

pub enum ExpandedValue<'a> {
    Scalar(String),
    List(&'a [String]),
    Mapping(Box<dyn Fn(&Expand<'a>, &str) -> Option<ExpandedValue<'a>> + Send + Sync>),
}

#[derive(PartialEq, Eq, Hash, EnumIter)]
pub enum PlaceHolder {
    SolutionDir,
    ProjectName,
    OutputDir,
    StagingDir,
    Assembly,
    AssemblyPath,
    AssemblyNoExt,
    BaseReport,
    ResultsFile,
    Files,
    TestList,
    TestSelection,
    TestRunReport,
    TestSettings,
}

impl PlaceHolder {
    pub fn get_string(&self) -> String {
        match self {
            Self::SolutionDir => "{solution_dir}",
            Self::ProjectName => "{project_name}",
            Self::OutputDir => "{output_dir}",
            Self::StagingDir => "{staging_dir}",
            Self::Assembly => "{assembly}",
            Self::AssemblyPath => "{assembly_path}",
            Self::AssemblyNoExt => "{assembly_no_ext}",
            Self::BaseReport => "{base_report}",
            Self::ResultsFile => "{results_file}",
            Self::Files => "{files}",
            Self::TestList => "{test_list}",
            Self::TestSelection => "{test_selection}",
            Self::TestRunReport => "{test_run_report}",
            Self::TestSettings => "{test_settings}",
        }
        .to_string()
    }
}

pub struct Expand<'a> {
    values: HashMap<String, ExpandedValue<'a>>,
}

impl Default for Expand<'_> {
    fn default() -> Self {
        Self::new()
    }
}

fn path_value(path: impl AsRef<Path>) -> String {
    String::from(path.as_ref().to_string_lossy())
}

impl<'a> Expand<'a> {
    pub fn new() -> Self {
        let mut values = HashMap::new();
        values.insert(
            PlaceHolder::AssemblyNoExt.get_string(),
            ExpandedValue::Mapping(Box::new(Expand::extract_assembly_no_ext)),
        );
        Self { values }
    }

    fn extract_assembly_no_ext(&self, _format_str: &str) -> Option<ExpandedValue<'a>> {
        match self.values.get(&PlaceHolder::Assembly.get_string()) {
            Some(ExpandedValue::Scalar(name)) => {
                let stem = Path::new(name).file_stem()?;
                Some(ExpandedValue::Scalar(String::from(stem.to_str()?)))
            }
            _ => None,
        }
    }

    pub fn set_value(&mut self, name: PlaceHolder, value: ExpandedValue<'a>) -> &mut Self {
        self.values.insert(name.get_string(), value);
        self
    }

    fn set_path(&mut self, name: PlaceHolder, path: impl AsRef<Path>) -> &mut Self {
        self.set_value(name, ExpandedValue::Scalar(path_value(path)))
    }

    pub fn solution_dir(&mut self, arg: impl AsRef<Path>) -> &mut Self {
        self.set_path(PlaceHolder::SolutionDir, arg)
    }

    pub fn project_name(&mut self, arg: &str) -> &mut Self {
        self.set_value(PlaceHolder::ProjectName, ExpandedValue::Scalar(arg.to_owned()))
    }

    pub fn output_dir(&mut self, arg: impl AsRef<Path>) -> &mut Self {
        self.set_path(PlaceHolder::OutputDir, arg)
    }

    pub fn staging_dir(&mut self, arg: impl AsRef<Path>) -> &mut Self {
        self.set_path(PlaceHolder::StagingDir, arg)
    }

    /// Sets `{assembly}` to the file name and `{assembly_path}` to the full path.
    pub fn assembly(&mut self, arg: impl AsRef<Path>) -> &mut Self {
        let arg = arg.as_ref();
        let name = arg
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.set_value(PlaceHolder::Assembly, ExpandedValue::Scalar(name));
        self.set_path(PlaceHolder::AssemblyPath, arg)
    }

    pub fn base_report(&mut self, arg: impl AsRef<Path>) -> &mut Self {
        self.set_path(PlaceHolder::BaseReport, arg)
    }

    pub fn results_file(&mut self, arg: impl AsRef<Path>) -> &mut Self {
        self.set_path(PlaceHolder::ResultsFile, arg)
    }

    pub fn files(&mut self, arg: &'a [String]) -> &mut Self {
        self.set_value(PlaceHolder::Files, ExpandedValue::List(arg))
    }

    pub fn test_list(&mut self, arg: impl AsRef<Path>) -> &mut Self {
        self.set_path(PlaceHolder::TestList, arg)
    }

    pub fn test_selection(&mut self, arg: impl AsRef<Path>) -> &mut Self {
        self.set_path(PlaceHolder::TestSelection, arg)
    }

    pub fn test_run_report(&mut self, arg: impl AsRef<Path>) -> &mut Self {
        self.set_path(PlaceHolder::TestRunReport, arg)
    }

    pub fn test_settings(&mut self, arg: Option<&Path>) -> &mut Self {
        let value = arg.map(path_value).unwrap_or_default();
        self.set_value(PlaceHolder::TestSettings, ExpandedValue::Scalar(value))
    }

    fn replace_value(
        &self,
        fmtstr: &str,
        mut arg: String,
        ev: &ExpandedValue<'a>,
    ) -> Result<String> {
        match ev {
            ExpandedValue::Scalar(v) => {
                arg = arg.replace(fmtstr, v);
                Ok(arg)
            }
            ExpandedValue::List(value) => {
                let replaced = self.evaluate(value)?;
                let replaced = replaced.join(" ");
                arg = arg.replace(fmtstr, &replaced);
                Ok(arg)
            }
            ExpandedValue::Mapping(func) => {
                if let Some(value) = func(self, fmtstr) {
                    let arg = self.replace_value(fmtstr, arg, &value)?;
                    Ok(arg)
                } else {
                    Ok(arg)
                }
            }
        }
    }

    pub fn evaluate_value<T: AsRef<str>>(&self, arg: T) -> Result<String> {
        let mut arg = arg.as_ref().to_owned();

        for placeholder in PlaceHolder::iter() {
            let fmtstr = &placeholder.get_string();
            match (arg.contains(fmtstr), self.values.get(fmtstr)) {
                (true, Some(ev)) => arg = self.replace_value(fmtstr, arg, ev)?,
                (true, None) => bail!("missing argument {}", fmtstr),
                (false, _) => (),
            }
        }
        Ok(arg)
    }

    /// Expand every argument. An argument that is exactly a list placeholder
    /// becomes one argument per list item.
    pub fn evaluate<T: AsRef<str>>(&self, args: &[T]) -> Result<Vec<String>> {
        let mut result = Vec::new();
        for arg in args {
            if let Some(ExpandedValue::List(items)) = self.values.get(arg.as_ref()) {
                result.extend(self.evaluate(items)?);
                continue;
            }

            let arg = self.evaluate_value(arg)?;
            result.push(arg);
        }
        Ok(result)
    }

    pub fn evaluate_env(&self, env: &HashMap<String, String>) -> Result<HashMap<String, String>> {
        let mut result = HashMap::new();
        for (key, value) in env {
            result.insert(key.clone(), self.evaluate_value(value)?);
        }
        Ok(result)
    }

    pub fn evaluate_path(&self, arg: impl AsRef<str>) -> Result<PathBuf> {
        Ok(PathBuf::from(self.evaluate_value(arg)?))
    }
}

#[cfg(test)]
mod tests {
    use super::Expand;
    use anyhow::Result;
    use std::path::Path;

    #[test]
    fn test_expand() -> Result<()> {
        let files: Vec<_> = vec!["a.dll", "b.exe"]
            .iter()
            .map(|p| p.to_string())
            .collect();

        let my_args = vec![
            "{solution_dir}/W.sln",
            "/project:{project_name}",
            "{files}",
            "--name={assembly_no_ext}",
            "{assembly_path}",
            "--files={files}",
        ];

        let result = Expand::new()
            .solution_dir(Path::new("/src"))
            .project_name("Widgets.Tests")
            .assembly("/out/Widgets.Tests.dll")
            .files(&files)
            .evaluate(&my_args)?;

        assert_eq!(
            result,
            vec![
                "/src/W.sln",
                "/project:Widgets.Tests",
                "a.dll",
                "b.exe",
                "--name=Widgets.Tests",
                "/out/Widgets.Tests.dll",
                "--files=a.dll b.exe",
            ]
        );

        assert!(Expand::new().evaluate(&my_args).is_err());

        Ok(())
    }

    #[test]
    fn test_unset_test_settings_expands_empty() -> Result<()> {
        let value = Expand::new()
            .test_settings(None)
            .evaluate_value("--settings={test_settings}")?;
        assert_eq!(value, "--settings=");

        Ok(())
    }
}
