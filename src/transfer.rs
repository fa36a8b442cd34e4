use std::path::{Path, PathBuf};
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::StudyAccession;
use crate::error::SyncError;
use crate::study_index::HARMONISED_MARKER;

/// Permissions applied to everything written into staging or the mirror.
pub const PERMISSION_MASK: &str = "Du=rwx,Dg=rwx,Do=rx,Fu=rw,Fg=rw,Fo=r";

/// Copy the contents of `source` into the directory `destination`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub source: Utf8PathBuf,
    pub destination: Utf8PathBuf,
    pub chmod: Option<String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub size_only: bool,
    pub delete: bool,
}

impl TransferRequest {
    pub fn new(source: impl Into<Utf8PathBuf>, destination: impl Into<Utf8PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            chmod: None,
            include: Vec::new(),
            exclude: Vec::new(),
            size_only: false,
            delete: false,
        }
    }

    /// Staging -> public mirror. Harmonised output and hidden files stay put.
    pub fn mirror_release(source: &Utf8Path, destination: &Utf8Path) -> Self {
        Self {
            chmod: Some(PERMISSION_MASK.to_string()),
            exclude: vec![HARMONISED_MARKER.to_string(), ".*".to_string()],
            size_only: true,
            delete: true,
            ..Self::new(source, destination)
        }
    }

    /// Staging -> harmonisation working area, summary statistics files only.
    pub fn harmonisation(
        source: &Utf8Path,
        destination: &Utf8Path,
        accession: &StudyAccession,
    ) -> Self {
        Self {
            include: vec![format!("{}*", accession.as_str())],
            exclude: vec!["*".to_string()],
            ..Self::new(source, destination)
        }
    }

    /// Deposition -> staging bin.
    pub fn deposition(source: &Utf8Path, destination: &Utf8Path) -> Self {
        Self {
            chmod: Some(PERMISSION_MASK.to_string()),
            ..Self::new(source, destination)
        }
    }
}

pub trait Transfer {
    fn transfer(&self, request: &TransferRequest) -> Result<(), SyncError>;
}

impl<T: Transfer + ?Sized> Transfer for &T {
    fn transfer(&self, request: &TransferRequest) -> Result<(), SyncError> {
        (**self).transfer(request)
    }
}

#[derive(Debug, Clone)]
pub struct RsyncTransfer {
    program: Option<PathBuf>,
}

impl RsyncTransfer {
    pub fn new() -> Self {
        Self {
            program: find_in_path("rsync"),
        }
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: Some(program.into()),
        }
    }

    pub fn is_available(&self) -> bool {
        self.program.is_some()
    }

    pub fn args(request: &TransferRequest) -> Vec<String> {
        let mut args = vec!["-rpvh".to_string()];
        if request.size_only {
            args.push("--size-only".to_string());
        }
        if request.delete {
            args.push("--delete".to_string());
        }
        if let Some(mask) = &request.chmod {
            args.push(format!("--chmod={mask}"));
        }
        // rsync applies filter rules in order: includes must come first.
        for pattern in &request.include {
            args.push(format!("--include={pattern}"));
        }
        for pattern in &request.exclude {
            args.push(format!("--exclude={pattern}"));
        }
        args.push(with_trailing_slash(&request.source));
        args.push(with_trailing_slash(&request.destination));
        args
    }

    fn run_cmd(&self, program: &Path, args: &[String]) -> Result<(), SyncError> {
        tracing::debug!(program = %program.display(), ?args, "running transfer");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| SyncError::Transfer(err.to_string()))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("{} exited with {}", program.display(), output.status)
        } else {
            stderr
        };
        Err(SyncError::Transfer(message))
    }
}

impl Default for RsyncTransfer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transfer for RsyncTransfer {
    fn transfer(&self, request: &TransferRequest) -> Result<(), SyncError> {
        let program = self
            .program
            .as_ref()
            .ok_or_else(|| SyncError::MissingTool("rsync".to_string()))?;
        self.run_cmd(program, &Self::args(request))
    }
}

fn with_trailing_slash(path: &Utf8Path) -> String {
    let value = path.as_str();
    if value.ends_with('/') {
        value.to_string()
    } else {
        format!("{value}/")
    }
}

pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}
