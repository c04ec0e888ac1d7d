//! Launch parameters and file slot validation

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    error::{ProcessError, Result},
    reaper::ExitEvent,
};

/// Number of slots with a defined meaning (stdin, stdout, stderr)
pub const STANDARD_SLOTS: usize = 3;

/// Positional designator for one of the child's file descriptors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Slot(pub usize);

impl Slot {
    pub const STDIN: Slot = Slot(0);
    pub const STDOUT: Slot = Slot(1);
    pub const STDERR: Slot = Slot(2);

    /// Descriptor number in the child
    pub fn index(self) -> usize {
        self.0
    }

    /// True for stdin, stdout and stderr
    pub fn is_standard(self) -> bool {
        self.0 < STANDARD_SLOTS
    }

    /// Canonical stream name: "stdin", "stdout", "stderr" or "slot N"
    pub fn name(self) -> String {
        match self.0 {
            0 => "stdin".to_string(),
            1 => "stdout".to_string(),
            2 => "stderr".to_string(),
            n => format!("slot {}", n),
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl From<usize> for Slot {
    fn from(index: usize) -> Self {
        Slot(index)
    }
}

/// Parsed form of a [`FileParam`] type token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileKind {
    /// `""`: the child inherits the parent's descriptor
    Inherit,
    /// `"pipe"`: a managed non-blocking pipe
    Pipe,
    /// `"file"`: redirect to a named file
    File,
    /// `"tpipe"`: pipe whose far end is a temporary file
    TPipe,
    /// `"npipe"`: named (FIFO) pipe
    NPipe,
    /// Any other token
    Unknown(String),
}

impl FileKind {
    pub fn parse(token: &str) -> Self {
        match token {
            "" => Self::Inherit,
            "pipe" => Self::Pipe,
            "file" => Self::File,
            "tpipe" => Self::TPipe,
            "npipe" => Self::NPipe,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Whether launching with this kind is supported.
    ///
    /// Every kind is listed: a new kind must be classified here before it
    /// can be used.
    pub fn is_implemented(&self) -> bool {
        match self {
            Self::Inherit | Self::Pipe => true,
            Self::File | Self::TPipe | Self::NPipe | Self::Unknown(_) => false,
        }
    }

    pub fn token(&self) -> &str {
        match self {
            Self::Inherit => "",
            Self::Pipe => "pipe",
            Self::File => "file",
            Self::TPipe => "tpipe",
            Self::NPipe => "npipe",
            Self::Unknown(token) => token,
        }
    }
}

/// How one child descriptor is wired
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileParam {
    /// Type token, see [`FileKind`]
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Optional name (file path, pipe name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl FileParam {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: None,
        }
    }

    pub fn named(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: Some(name.into()),
        }
    }

    /// Inherit the parent's descriptor
    pub fn inherit() -> Self {
        Self::default()
    }

    /// Managed pipe
    pub fn pipe() -> Self {
        Self::new("pipe")
    }

    pub fn file_kind(&self) -> FileKind {
        FileKind::parse(&self.kind)
    }
}

/// Launch descriptor for a child process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Params {
    /// Program to run; bare names are looked up on `PATH`
    pub executable: String,
    /// Arguments, not including the program name
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory (None = inherit)
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Environment variables added to (or, with `env_clear`, replacing) the parent's
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Start the child with only the variables in `env`
    #[serde(default)]
    pub env_clear: bool,
    /// Terminate the child when its owning [`Process`](crate::Process) is dropped
    #[serde(default = "default_autokill")]
    pub autokill: bool,
    /// Slot wiring; position in the list is the descriptor number
    #[serde(default)]
    pub files: Vec<FileParam>,
    /// Description used in log lines and error messages
    #[serde(default)]
    pub desc: Option<String>,
    /// Receives one [`ExitEvent`] when the child is reaped
    #[serde(skip)]
    pub on_exit: Option<UnboundedSender<ExitEvent>>,
}

fn default_autokill() -> bool {
    true
}

impl Params {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            args: vec![],
            cwd: None,
            env: BTreeMap::new(),
            env_clear: false,
            autokill: true,
            files: vec![],
            desc: None,
            on_exit: None,
        }
    }

    /// Parse a launch descriptor from TOML
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| ProcessError::InvalidConfig(e.to_string()))
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn env_clear(mut self, clear: bool) -> Self {
        self.env_clear = clear;
        self
    }

    pub fn autokill(mut self, autokill: bool) -> Self {
        self.autokill = autokill;
        self
    }

    /// Append the wiring for the next slot
    pub fn file(mut self, file: FileParam) -> Self {
        self.files.push(file);
        self
    }

    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    pub fn on_exit(mut self, sender: UnboundedSender<ExitEvent>) -> Self {
        self.on_exit = Some(sender);
        self
    }

    /// Description for diagnostics, falling back to the executable
    pub fn description(&self) -> &str {
        self.desc.as_deref().unwrap_or(&self.executable)
    }

    /// Kind for a standard slot; slots past the end of `files` inherit
    pub fn slot_kind(&self, slot: Slot) -> FileKind {
        self.files
            .get(slot.index())
            .map(FileParam::file_kind)
            .unwrap_or(FileKind::Inherit)
    }
}

/// Non-fatal finding from [`validate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// `"pipe"` with a name on a standard slot; the name is ignored
    NamedPipe { slot: Slot, name: String },
    /// Inherit entry past stderr; ignored
    ReservedSlotIgnored { slot: Slot },
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NamedPipe { slot, name } => write!(
                f,
                "{}: internal pipe name '{}' not yet supported; using anonymous pipe",
                slot, name
            ),
            Self::ReservedSlotIgnored { slot } => {
                write!(f, "{} is reserved; entry ignored", slot)
            }
        }
    }
}

/// Check launch parameters before any OS resource is touched.
///
/// Returns the soft warnings on success; the first fatal finding otherwise.
pub fn validate(params: &Params) -> Result<Vec<ValidationWarning>> {
    if params.executable.trim().is_empty() {
        return Err(ProcessError::InvalidConfig(
            "executable must not be empty".to_string(),
        ));
    }

    let mut warnings = Vec::new();
    for (index, file) in params.files.iter().enumerate() {
        let slot = Slot(index);
        let kind = file.file_kind();

        if !kind.is_implemented() {
            return Err(ProcessError::UnsupportedFile {
                slot,
                kind: kind.token().to_string(),
            });
        }

        if !slot.is_standard() {
            if kind == FileKind::Inherit {
                warnings.push(ValidationWarning::ReservedSlotIgnored { slot });
                continue;
            }
            return Err(ProcessError::ReservedSlot {
                slot,
                kind: kind.token().to_string(),
            });
        }

        if let (FileKind::Pipe, Some(name)) = (&kind, &file.name) {
            warnings.push(ValidationWarning::NamedPipe {
                slot,
                name: name.clone(),
            });
        }
    }

    Ok(warnings)
}
