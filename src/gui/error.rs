use std::{error::Error, fmt::Display, sync::mpsc};

use crate::{
    camera::CameraError, config::ConfigError, recorder::RecordError,
    rotation_channel::TransportError,
};

#[derive(Debug)]
pub enum MonitorError {
    IOError(std::io::Error),
    MPSCSendError,
    MPSCRecvError(mpsc::RecvError),
    JoinError,
    Config(ConfigError),
    Transport(TransportError),
    Camera(CameraError),
    Record(RecordError),
}

impl Display for MonitorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorError::IOError(e) => write!(f, "terminal error: {}", e),
            MonitorError::MPSCSendError => write!(f, "the session dispatcher is gone"),
            MonitorError::MPSCRecvError(e) => write!(f, "lost the session dispatcher: {}", e),
            MonitorError::JoinError => write!(f, "the session dispatcher panicked"),
            MonitorError::Config(e) => write!(f, "{}", e),
            MonitorError::Transport(e) => write!(f, "rig transport: {}", e),
            MonitorError::Camera(e) => write!(f, "camera: {}", e),
            MonitorError::Record(e) => write!(f, "{}", e),
        }
    }
}

impl Error for MonitorError {}

impl From<std::io::Error> for MonitorError {
    fn from(value: std::io::Error) -> Self {
        Self::IOError(value)
    }
}

impl<T> From<mpsc::SendError<T>> for MonitorError {
    fn from(_: mpsc::SendError<T>) -> Self {
        Self::MPSCSendError
    }
}

impl From<mpsc::RecvError> for MonitorError {
    fn from(value: mpsc::RecvError) -> Self {
        Self::MPSCRecvError(value)
    }
}

impl From<ConfigError> for MonitorError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TransportError> for MonitorError {
    fn from(value: TransportError) -> Self {
        Self::Transport(value)
    }
}

impl From<CameraError> for MonitorError {
    fn from(value: CameraError) -> Self {
        Self::Camera(value)
    }
}

impl From<RecordError> for MonitorError {
    fn from(value: RecordError) -> Self {
        Self::Record(value)
    }
}
