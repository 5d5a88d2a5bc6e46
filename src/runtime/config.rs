use std::io;

use serde::{Deserialize, Serialize};

use crate::codegen::Language;
use crate::common::*;

/// Toolchain settings of the sandbox server.
///
/// Command lines are templates: every argument may mention `{dir}` (the
/// artifact directory), `{source}` (the candidate's source file),
/// `{skeleton}` (the generated skeleton) and `{binary}` (the executable
/// the compile step produces).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub root: PathBuf,
    pub languages: HashMap<Language, LanguageConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageConfig {
    /// Empty when the language runs from source.
    #[serde(default)]
    pub compile: Vec<String>,
    pub run: Vec<String>,
}

/// Paths an artifact's command lines are expanded with.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub dir: PathBuf,
    pub source: PathBuf,
    pub skeleton: PathBuf,
    pub binary: PathBuf,
}

fn words(line: &[&str]) -> Vec<String> {
    line.iter().map(|w| w.to_string()).collect()
}

impl Default for ServerConfig {
    fn default() -> Self {
        let languages = hashmap! {
            Language::Cpp => LanguageConfig {
                compile: words(&["g++", "-O2", "-std=c++17", "-o", "{binary}", "{skeleton}", "{source}"]),
                run: words(&["{binary}"]),
            },
            Language::Rust => LanguageConfig {
                compile: words(&["rustc", "-O", "--edition", "2018", "-o", "{binary}", "{skeleton}"]),
                run: words(&["{binary}"]),
            },
            Language::Python => LanguageConfig {
                compile: vec![],
                run: words(&["python3", "{skeleton}"]),
            },
        };
        ServerConfig { root: std::env::temp_dir(), languages }
    }
}

impl ServerConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
    pub fn load(path: &Path) -> io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
    pub fn language(&self, language: Language) -> Option<&LanguageConfig> {
        self.languages.get(&language)
    }
}

impl ArtifactPaths {
    pub fn new(dir: &Path, language: Language) -> Self {
        ArtifactPaths {
            dir: dir.to_owned(),
            source: dir.join(language.solution_file()),
            skeleton: dir.join(language.skeleton_file()),
            binary: dir.join("solution"),
        }
    }
    pub fn expand(&self, template: &[String]) -> Vec<String> {
        template
            .iter()
            .map(|word| {
                word.replace("{dir}", &self.dir.to_string_lossy())
                    .replace("{source}", &self.source.to_string_lossy())
                    .replace("{skeleton}", &self.skeleton.to_string_lossy())
                    .replace("{binary}", &self.binary.to_string_lossy())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_know_every_language() {
        let config = ServerConfig::default();
        for &language in &[Language::Cpp, Language::Rust, Language::Python] {
            assert!(config.language(language).is_some(), "{}", language);
        }
        assert!(config.language(Language::Python).unwrap().compile.is_empty());
    }

    #[test]
    fn from_json() {
        let config = ServerConfig::from_json(
            r#"{"root": "/srv/sessions", "languages": {"python": {"run": ["pypy3", "{skeleton}"]}}}"#,
        )
        .unwrap();
        assert_eq!(config.root, PathBuf::from("/srv/sessions"));
        assert_eq!(config.languages.len(), 1);
        assert_eq!(config.language(Language::Python).unwrap().run, vec!["pypy3", "{skeleton}"]);
        assert!(ServerConfig::from_json(r#"{"languages": {"cobol": {"run": []}}}"#).is_err());
    }

    #[test]
    fn expand_placeholders() {
        let paths = ArtifactPaths::new(Path::new("/tmp/a"), Language::Cpp);
        let compile = &ServerConfig::default().languages[&Language::Cpp].compile;
        assert_eq!(
            paths.expand(compile),
            vec!["g++", "-O2", "-std=c++17", "-o", "/tmp/a/solution", "/tmp/a/skeleton.cpp", "/tmp/a/solution.cpp"]
        );
    }
}
