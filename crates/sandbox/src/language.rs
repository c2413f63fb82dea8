//! Supported languages and how to build and run a script for each.
//!
//! Commands are argv vectors that may contain the placeholders `{file}`,
//! `{dir}` and `{stem}`. They expand to the staged script path inside the
//! sandbox (`/tmp/script.<ext>`), its directory (`/tmp`) and the path without
//! extension (`/tmp/script`).

use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};

/// Directory inside every sandbox that receives the staged script.
pub const SANDBOX_DIR: &str = "/tmp";

/// File stem of the staged script.
pub const SCRIPT_STEM: &str = "script";

/// How to compile (optionally) and run programs of one language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageSpec {
    pub name: String,
    /// Container image the pool's sandboxes are created from.
    pub image: String,
    /// Script file extension, without the dot.
    pub extension: String,
    #[serde(default)]
    pub compile: Option<Vec<String>>,
    pub run: Vec<String>,
    /// Files besides the script that a run leaves behind (compiled binaries,
    /// class files).
    #[serde(default)]
    pub artifacts: Vec<String>,
}

impl LanguageSpec {
    pub fn interpreted(name: &str, image: &str, extension: &str, run: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            extension: extension.to_string(),
            compile: None,
            run: to_argv(run),
            artifacts: Vec::new(),
        }
    }

    pub fn compiled(
        name: &str,
        image: &str,
        extension: &str,
        compile: &[&str],
        run: &[&str],
        artifacts: &[&str],
    ) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            extension: extension.to_string(),
            compile: Some(to_argv(compile)),
            run: to_argv(run),
            artifacts: to_argv(artifacts),
        }
    }

    /// File name the code is staged under, e.g. `script.py`.
    #[must_use]
    pub fn script_name(&self) -> String {
        format!("{SCRIPT_STEM}.{}", self.extension)
    }

    /// Absolute path of the staged script inside the sandbox.
    #[must_use]
    pub fn remote_path(&self) -> String {
        format!("{SANDBOX_DIR}/{}", self.script_name())
    }

    #[must_use]
    pub fn is_compiled(&self) -> bool {
        self.compile.is_some()
    }

    #[must_use]
    pub fn compile_command(&self) -> Option<Vec<String>> {
        self.compile.as_deref().map(|argv| self.render(argv))
    }

    #[must_use]
    pub fn run_command(&self) -> Vec<String> {
        self.render(&self.run)
    }

    /// Command that removes the script and every artifact from the sandbox.
    ///
    /// Runs through `sh -c` so artifact entries may be globs.
    #[must_use]
    pub fn scrub_command(&self) -> Vec<String> {
        let mut paths = vec![self.remote_path()];
        paths.extend(self.render(&self.artifacts));
        vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("rm -rf {}", paths.join(" ")),
        ]
    }

    fn render(&self, argv: &[String]) -> Vec<String> {
        let file = self.remote_path();
        let stem = format!("{SANDBOX_DIR}/{SCRIPT_STEM}");
        argv.iter()
            .map(|arg| {
                arg.replace("{file}", &file)
                    .replace("{stem}", &stem)
                    .replace("{dir}", SANDBOX_DIR)
            })
            .collect()
    }
}

fn to_argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_string()).collect()
}

/// The fixed set of languages an executor serves, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct LanguageTable {
    specs: BTreeMap<String, Arc<LanguageSpec>>,
}

impl LanguageTable {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Languages available out of the box.
    ///
    /// Java programs must declare their entry point in a class named
    /// `script`, matching the staged file name.
    #[must_use]
    pub fn builtin() -> Self {
        let mut table = Self::empty();
        table.insert(LanguageSpec::interpreted(
            "python3",
            "python:3.12-slim",
            "py",
            &["python3", "{file}"],
        ));
        table.insert(LanguageSpec::interpreted(
            "nodejs",
            "node:22-alpine",
            "js",
            &["node", "{file}"],
        ));
        table.insert(LanguageSpec::compiled(
            "java",
            "eclipse-temurin:21-jdk",
            "java",
            &["javac", "{file}"],
            &["java", "-cp", "{dir}", "script"],
            &["{dir}/*.class"],
        ));
        table.insert(LanguageSpec::compiled(
            "cpp",
            "gcc:14",
            "cpp",
            &["g++", "{file}", "-o", "{stem}"],
            &["{stem}"],
            &["{stem}"],
        ));
        table.insert(LanguageSpec::interpreted(
            "go",
            "golang:1.23-alpine",
            "go",
            &["go", "run", "{file}"],
        ));
        table
    }

    /// Add or replace a language.
    pub fn insert(&mut self, spec: LanguageSpec) {
        self.specs.insert(spec.name.clone(), Arc::new(spec));
    }

    /// Keep only the named languages.
    pub fn retain(&mut self, names: &[String]) {
        self.specs.retain(|name, _| names.contains(name));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<LanguageSpec>> {
        self.specs.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<LanguageSpec>> {
        self.specs.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
