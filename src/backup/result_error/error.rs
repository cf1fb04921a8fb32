use crate::backup::location::fsck::FsckStatus;
use crate::backup::result_error::{WithDebugObjectAndFnName, WithMsg};
use itertools::Itertools;
use std::fmt::Debug;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error("execution tree references undefined location {0:?}")]
    UnknownLocation(String),
    #[error("unsupported operating system detected on {location}: {uname:?}")]
    UnsupportedOperatingSystem { location: String, uname: String },
    #[error("remote host {0} needs to be analyzed before commands can be executed")]
    HostNotAnalyzed(String),
    #[error("fsck on {location} failed with status {code} ({status}), execution halted", code = .status.code().map_or_else(|| "-".to_string(), |c| c.to_string()))]
    FsckFatal { location: String, status: FsckStatus },
    #[error("config file could not be located, searched: {}", .0.iter().map(|p| format!("{p:?}")).join(", "))]
    ConfigNotFound(Vec<PathBuf>),
    #[error("locations specified for fsck {reason}: {}", .names.join(" "))]
    FsckSelection { reason: String, names: Vec<String> },
    #[error("failed to spawn {command:?}: {source}")]
    CommandSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{:?} {} failed:\n{}", obj_debug, fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithDebugObjAndFnName {
        error: Box<Error>,
        obj_debug: Box<dyn Debug + Send>,
        fn_name: String,
    },
    #[error("{}", itertools::join(.0, "\n\n"))]
    LotsOfError(Vec<Error>),
}

impl<S: Into<String>, O: Debug + Send + 'static> WithDebugObjectAndFnName<S, O> for Error {
    fn with_debug_object_and_fn_name(self, obj: O, fn_name: S) -> Self {
        Error::WithDebugObjAndFnName {
            error: Box::new(self),
            obj_debug: Box::new(obj),
            fn_name: fn_name.into(),
        }
    }
}

impl<S: Into<String>> WithMsg<S> for Error {
    fn with_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl From<Vec<Error>> for Error {
    fn from(errors: Vec<Error>) -> Self {
        if errors.is_empty() {
            panic!("Should not create lots of errors when error is empty")
        }
        Self::LotsOfError(errors.into_iter().flat_map(Error::into_iter).collect_vec())
    }
}

impl Error {
    pub fn into_iter(self) -> Box<dyn Iterator<Item = Error>> {
        match self {
            Error::LotsOfError(v) => Box::new(v.into_iter().flat_map(Error::into_iter)),
            e => Box::new(std::iter::once(e)),
        }
    }

    pub fn chain(self, other: Error) -> Error {
        Error::LotsOfError(self.into_iter().chain(other.into_iter()).collect_vec())
    }

    /// True when this error, or any error it wraps, is a fatal fsck failure.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::FsckFatal { .. } => true,
            Error::WithMsg { error, .. } | Error::WithDebugObjAndFnName { error, .. } => {
                error.is_fatal()
            }
            Error::LotsOfError(v) => v.iter().any(Error::is_fatal),
            _ => false,
        }
    }
}
