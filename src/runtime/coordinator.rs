//! Hands out sandbox sessions.
//!
//! A client writes one JSON request line to `request.pipe` of the queue
//! directory and reads the answer from `response.pipe`. Every request gets
//! a fresh session directory whose control pipes are served on a thread of
//! their own. Candidates are compiled once per distinct request.

use std::fs;
use std::io::{BufRead, BufReader};
use std::process::Command;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::codegen::{self, Language};
use crate::common::*;
use crate::protocol::messages::write_line;
use crate::protocol::InterfaceDefinition;
use crate::runtime::cache::ArtifactCache;
use crate::runtime::config::{ArtifactPaths, ServerConfig};
use crate::runtime::errors::*;
use crate::runtime::pipes::*;
use crate::runtime::process::{Launch, SandboxProcess};
use crate::runtime::server;

pub const REQUEST: &str = "request.pipe";
pub const RESPONSE: &str = "response.pipe";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionRequest {
    pub language: Language,
    pub source: String,
    pub interface: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResponse {
    pub sandbox_process_dir: PathBuf,
}

/// A built candidate. Its directory lives as long as the value.
#[derive(Debug)]
pub struct Executable {
    dir: TempDir,
    pub run: Vec<String>,
}

type Compiled = Result<Arc<Executable>, CompilationFailed>;

pub struct Coordinator {
    config: ServerConfig,
    cache: ArtifactCache<SessionRequest, Compiled>,
    queue: TempDir,
}

impl Executable {
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

/// Writes the skeleton and the candidate's source side by side and runs
/// the language's compile command over them.
pub fn compile_algorithm(config: &ServerConfig, request: &SessionRequest) -> Result<Executable, CompilationFailed> {
    let language = request.language;
    let failed = |output: String| CompilationFailed { language: language.to_string(), output };
    let toolchain = config.language(language).ok_or_else(|| failed(format!("no toolchain for {}", language)))?;
    let interface = InterfaceDefinition::parse(request.interface.as_bytes()).map_err(failed)?;
    let dir = tempfile::Builder::new()
        .prefix("artifact_")
        .tempdir_in(&config.root)
        .map_err(|e| failed(e.to_string()))?;
    let paths = ArtifactPaths::new(dir.path(), language);
    fs::write(&paths.skeleton, codegen::skeleton(&interface, language)).map_err(|e| failed(e.to_string()))?;
    fs::write(&paths.source, &request.source).map_err(|e| failed(e.to_string()))?;
    if let Some((program, args)) = paths.expand(&toolchain.compile).split_first() {
        log::info!("compiling {} in {}", language, dir.path().display());
        let output = Command::new(program)
            .args(args)
            .current_dir(dir.path())
            .output()
            .map_err(|e| failed(format!("{}: {}", program, e)))?;
        if !output.status.success() {
            let mut text = String::from_utf8_lossy(&output.stderr).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stdout));
            return Err(failed(text));
        }
    }
    Ok(Executable { run: paths.expand(&toolchain.run), dir })
}

/// Asks the coordinator listening on `queue` for a session.
pub fn request_session(queue: &Path, request: &SessionRequest) -> Result<PathBuf, SandboxError> {
    {
        let mut requests = open_write(&queue.join(REQUEST))?;
        write_line(&mut requests, serde_json::to_string(request)?)?;
    }
    let mut line = String::new();
    BufReader::new(open_read(&queue.join(RESPONSE))?).read_line(&mut line)?;
    let response: SessionResponse = serde_json::from_str(&line)?;
    Ok(response.sandbox_process_dir)
}

/// Makes the coordinator listening on `queue` return once its sessions end.
pub fn stop(queue: &Path) -> Result<(), SandboxError> {
    open_write(&queue.join(REQUEST))?;
    Ok(())
}

impl Coordinator {
    pub fn new(config: ServerConfig) -> Result<Self, SandboxError> {
        let queue = tempfile::Builder::new().prefix("sandbox_queue_").tempdir_in(&config.root)?;
        make_fifo(&queue.path().join(REQUEST))?;
        make_fifo(&queue.path().join(RESPONSE))?;
        Ok(Coordinator { config, cache: ArtifactCache::new(), queue })
    }
    pub fn queue_dir(&self) -> &Path {
        self.queue.path()
    }
    pub fn compile(&self, request: &SessionRequest) -> Compiled {
        self.cache.get_or_compute(request, || compile_algorithm(&self.config, request).map(Arc::new))
    }

    /// A session directory and the process it controls, not yet served.
    pub fn open_session(&self, request: &SessionRequest) -> Result<(SessionDir, SandboxProcess), SandboxError> {
        let session = SessionDir::create(&self.config.root)?;
        let launch = match self.compile(request) {
            Ok(executable) => Launch::Executable { argv: executable.run.clone(), dir: executable.dir().to_owned() },
            Err(failure) => {
                log::info!("{}", failure);
                Launch::CompilationFailed(failure)
            }
        };
        let process = SandboxProcess::new(launch, session.pipe(DOWNWARD), session.pipe(UPWARD));
        Ok((session, process))
    }

    // One request per opening of the request pipe.
    fn next_request(&self) -> Result<Option<SessionRequest>, SandboxError> {
        let mut line = String::new();
        BufReader::new(open_read(&self.queue.path().join(REQUEST))?).read_line(&mut line)?;
        if line.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&line)?))
    }

    /// Serves session requests until `stop` is called, then waits for the
    /// sessions still running.
    pub fn serve(&self) -> Result<(), SandboxError> {
        crossbeam_utils::thread::scope(|s| -> Result<(), SandboxError> {
            while let Some(request) = self.next_request()? {
                let (session, mut process) = self.open_session(&request)?;
                let response = SessionResponse { sandbox_process_dir: session.path().to_owned() };
                s.spawn(move |_| {
                    match server::serve(&mut process, session.path()) {
                        Ok(status) => log::debug!("{}: session over, {:?}", session.path().display(), status),
                        Err(e) => log::warn!("{}: session failed: {}", session.path().display(), e),
                    }
                    log::trace!("{}", process.log());
                });
                let mut responses = open_write(&self.queue.path().join(RESPONSE))?;
                write_line(&mut responses, serde_json::to_string(&response)?)?;
            }
            Ok(())
        })
        .map_err(|_| SandboxError::Os("a session thread panicked".into()))?
    }
}

#[cfg(test)]
mod tests {
    extern crate test_generator;

    use super::*;
    use crate::runtime::config::LanguageConfig;
    use crate::runtime::server::SandboxProcessClient;
    use std::io::BufRead;
    use test_generator::test_resources;

    const INTERFACE: &str = "var int n; main { input n; output n; }";

    fn config(root: &Path, compile: &[&str]) -> ServerConfig {
        let toolchain = LanguageConfig {
            compile: compile.iter().map(|w| w.to_string()).collect(),
            run: vec!["cat".into()],
        };
        ServerConfig { root: root.to_owned(), languages: hashmap! { Language::Python => toolchain } }
    }

    fn request(source: &str) -> SessionRequest {
        SessionRequest { language: Language::Python, source: source.into(), interface: INTERFACE.into() }
    }

    #[test]
    fn compiles_once() {
        let root = tempfile::tempdir().unwrap();
        let coordinator = Coordinator::new(config(root.path(), &["test", "-f", "{source}"])).unwrap();
        let first = coordinator.compile(&request("print(1)")).unwrap();
        let second = coordinator.compile(&request("print(1)")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.dir().join("skeleton.py").exists());
        assert_eq!(fs::read_to_string(first.dir().join("solution.py")).unwrap(), "print(1)");
        let third = coordinator.compile(&request("print(2)")).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn compilation_failures() {
        let root = tempfile::tempdir().unwrap();
        let coordinator = Coordinator::new(config(root.path(), &["sh", "-c", "echo broken >&2; exit 1"])).unwrap();
        let failure = coordinator.compile(&request("")).unwrap_err();
        assert_eq!(failure, CompilationFailed { language: "python".into(), output: "broken\n".into() });

        let mut bad = request("");
        bad.interface = "main { input n; }".into();
        let failure = coordinator.compile(&bad).unwrap_err();
        assert!(failure.output.contains("VARIABLE_NOT_DECLARED"), "{}", failure.output);

        bad.language = Language::Cpp;
        assert_eq!(coordinator.compile(&bad).unwrap_err().output, "no toolchain for cpp");
    }

    fn installed(program: &str) -> bool {
        Command::new(program).arg("--version").output().map(|o| o.status.success()).unwrap_or(false)
    }

    // Generated skeletons build together with the generated template.
    #[test_resources("testdata/compile/positive/*.ifc")]
    fn templates_compile(resource: &str) {
        let interface = fs::read_to_string(resource).unwrap();
        let definition = InterfaceDefinition::parse(interface.as_bytes()).unwrap();
        let root = tempfile::tempdir().unwrap();
        let config = ServerConfig { root: root.path().to_owned(), ..ServerConfig::default() };
        for &(language, program) in &[(Language::Cpp, "g++"), (Language::Rust, "rustc")] {
            if !installed(program) {
                println!("{} not installed, skipping {}", program, language);
                continue;
            }
            let request = SessionRequest {
                language,
                source: codegen::template(&definition, language),
                interface: interface.clone(),
            };
            match compile_algorithm(&config, &request) {
                Ok(executable) => assert!(executable.dir().join("solution").exists()),
                Err(failure) => panic!("{}: {}", resource, failure),
            }
        }
    }

    #[test]
    fn serves_sessions() {
        let root = tempfile::tempdir().unwrap();
        let coordinator = Coordinator::new(config(root.path(), &[])).unwrap();
        let queue = coordinator.queue_dir().to_owned();
        crossbeam_utils::thread::scope(|s| {
            let serving = s.spawn(|_| coordinator.serve());
            for value in &["7", "8"] {
                let dir = request_session(&queue, &request("")).unwrap();
                let mut client = SandboxProcessClient::connect(&dir).unwrap();
                let mut channels = client.start().unwrap();
                write_line(&mut channels.downward, value).unwrap();
                let mut line = String::new();
                channels.upward.read_line(&mut line).unwrap();
                assert_eq!(line.trim(), *value);
                drop(channels);
                assert!(client.wait().unwrap().is_success());
            }
            stop(&queue).unwrap();
            serving.join().unwrap().unwrap();
        })
        .unwrap();
        assert_eq!(coordinator.cache.len(), 1);
    }
}
