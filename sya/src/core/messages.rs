//! borg `--log-json` records and how they are surfaced.

use serde::Deserialize;

/// One JSON line emitted by borg on stderr.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BorgMessage {
    LogMessage {
        #[serde(default)]
        levelname: String,
        /// Logger name, e.g. `borg.output.stats`.
        #[serde(default)]
        name: String,
        #[serde(default)]
        message: String,
        #[serde(default)]
        msgid: Option<String>,
    },
    ArchiveProgress {
        #[serde(default)]
        original_size: u64,
        #[serde(default)]
        compressed_size: u64,
        #[serde(default)]
        deduplicated_size: u64,
        #[serde(default)]
        nfiles: u64,
        #[serde(default)]
        path: String,
        #[serde(default)]
        finished: bool,
    },
    ProgressMessage {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        msgid: Option<String>,
        #[serde(default)]
        finished: bool,
    },
    ProgressPercent {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        current: Option<u64>,
        #[serde(default)]
        total: Option<u64>,
        #[serde(default)]
        finished: bool,
    },
    FileStatus {
        #[serde(default)]
        status: String,
        #[serde(default)]
        path: String,
    },
    /// Question prompts and anything newer borg versions add.
    #[serde(other)]
    Other,
}

/// stdout of `borg list --json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ArchiveList {
    #[serde(default)]
    pub archives: Vec<ArchiveInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArchiveInfo {
    pub name: String,
    #[serde(default)]
    pub start: Option<String>,
}

/// borg error msgids; a record carrying one reports a fatal problem.
pub const ERROR_MSGIDS: &[&str] = &[
    "Archive.AlreadyExists",
    "Archive.DoesNotExist",
    "Archive.IncompatibleFilesystemEncodingError",
    "Cache.CacheInitAbortedError",
    "Cache.EncryptionMethodMismatch",
    "Cache.RepositoryAccessAborted",
    "Cache.RepositoryIDNotUnique",
    "Cache.RepositoryReplay",
    "Buffer.MemoryLimitExceeded",
    "ExtensionModuleError",
    "IntegrityError",
    "NoManifestError",
    "PlaceholderError",
    "KeyfileInvalidError",
    "KeyfileMismatchError",
    "KeyfileNotFoundError",
    "PassphraseWrong",
    "PasswordRetriesExceeded",
    "RepoKeyNotFoundError",
    "UnsupportedManifestError",
    "UnsupportedPayloadError",
    "NotABorgKeyFile",
    "RepoIdMismatch",
    "UnencryptedRepo",
    "UnknownKeyType",
    "LockError",
    "LockErrorT",
    "ConnectionClosed",
    "InvalidRPCMethod",
    "PathNotAllowed",
    "RemoteRepository.RPCServerOutdated",
    "UnexpectedRPCDataFormatFromClient",
    "UnexpectedRPCDataFormatFromServer",
    "Repository.AlreadyExists",
    "Repository.CheckNeeded",
    "Repository.DoesNotExist",
    "Repository.InsufficientFreeSpaceError",
    "Repository.InvalidRepository",
    "Repository.AtticRepository",
    "Repository.ObjectNotFound",
];

/// Confirmation prompts borg cannot answer without a terminal.
pub const PROMPT_MSGIDS: &[&str] = &[
    "BORG_UNKNOWN_UNENCRYPTED_REPO_ACCESS_IS_OK",
    "BORG_RELOCATED_REPO_ACCESS_IS_OK",
    "BORG_CHECK_I_KNOW_WHAT_I_AM_DOING",
    "BORG_DELETE_I_KNOW_WHAT_I_AM_DOING",
    "BORG_RECREATE_I_KNOW_WHAT_I_AM_DOING",
];

/// How a record should be surfaced in our own log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Error(String),
    Prompt(String),
    /// What borg would print on a plain terminal session.
    Output(String),
    Progress(String),
    Debug(String),
    Ignore,
}

impl BorgMessage {
    /// msgid of a log record, if any.
    pub fn msgid(&self) -> Option<&str> {
        match self {
            BorgMessage::LogMessage { msgid, .. } | BorgMessage::ProgressMessage { msgid, .. } => {
                msgid.as_deref()
            }
            _ => None,
        }
    }

    /// True for log records with a known borg error msgid.
    pub fn is_error(&self) -> bool {
        matches!(self, BorgMessage::LogMessage { msgid: Some(id), .. } if ERROR_MSGIDS.contains(&id.as_str()))
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            BorgMessage::LogMessage {
                levelname,
                name,
                message,
                msgid,
            } => {
                let text = message.trim_end_matches('\n').to_string();
                let msgid = msgid.as_deref().unwrap_or_default();
                if ERROR_MSGIDS.contains(&msgid) {
                    Disposition::Error(text)
                } else if PROMPT_MSGIDS.contains(&msgid) {
                    Disposition::Prompt(text)
                } else if name == "borg.output.progress" {
                    Disposition::Ignore
                } else if name.starts_with("borg.output") {
                    Disposition::Output(text)
                } else if matches!(levelname.as_str(), "ERROR" | "CRITICAL") {
                    Disposition::Error(text)
                } else {
                    Disposition::Debug(text)
                }
            }
            BorgMessage::ArchiveProgress {
                original_size,
                compressed_size,
                deduplicated_size,
                nfiles,
                path,
                finished,
            } => {
                if *finished {
                    return Disposition::Ignore;
                }
                Disposition::Progress(format!(
                    "{} O {} C {} D {} N {}",
                    format_file_size(*original_size),
                    format_file_size(*compressed_size),
                    format_file_size(*deduplicated_size),
                    nfiles,
                    path
                ))
            }
            BorgMessage::ProgressMessage {
                message: Some(message),
                finished: false,
                ..
            } => Disposition::Progress(message.clone()),
            BorgMessage::ProgressPercent {
                message: Some(message),
                finished: false,
                ..
            } => Disposition::Progress(message.clone()),
            BorgMessage::FileStatus { status, path } => {
                Disposition::Debug(format!("{status} {path}"))
            }
            _ => Disposition::Ignore,
        }
    }
}

/// Decimal size with two decimals, the way borg prints sizes (`1.50 MB`).
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 8] = ["k", "M", "G", "T", "P", "E", "Z", "Y"];
    if bytes < 1000 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    for unit in &UNITS[..UNITS.len() - 1] {
        value /= 1000.0;
        if (value * 100.0).round() / 100.0 < 1000.0 {
            return format!("{value:.2} {unit}B");
        }
    }
    value /= 1000.0;
    format!("{value:.2} {}B", UNITS[UNITS.len() - 1])
}
