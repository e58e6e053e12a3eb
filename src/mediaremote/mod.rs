//! Bindings to Apple's private MediaRemote framework.
//!
//! `sys` holds the raw extern declarations. On macOS, `MediaRemote` wraps them
//! with closures in place of Objective-C blocks and decodes the now-playing
//! dictionary into [`NowPlayingInfo`]. Other platforms only get the error type
//! and a `query` that reports the binding as unavailable.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::models::NowPlayingInfo;

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "macos")]
pub mod sys;

#[cfg(target_os = "macos")]
pub use macos::{MediaRemote, Notification, NotificationObserver};

#[derive(Debug, Error)]
pub enum MediaRemoteError {
    #[error("MediaRemote is only available on macOS")]
    Unsupported,
    #[cfg_attr(not(target_os = "macos"), allow(dead_code))]
    #[error("Timed out waiting for MediaRemote to return the {0}")]
    Timeout(&'static str),
}

/// Result of a one-shot query: info, display name and client bundle id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NowPlayingQuery {
    pub info: Option<NowPlayingInfo>,
    pub app_name: Option<String>,
    pub bundle_id: Option<String>,
}

#[cfg(target_os = "macos")]
pub fn query(timeout: Duration) -> Result<NowPlayingQuery, MediaRemoteError> {
    MediaRemote::new().query(timeout)
}

#[cfg(not(target_os = "macos"))]
pub fn query(_timeout: Duration) -> Result<NowPlayingQuery, MediaRemoteError> {
    Err(MediaRemoteError::Unsupported)
}

#[cfg(all(test, not(target_os = "macos")))]
mod tests {
    use super::*;

    #[test]
    fn test_query_unsupported() {
        let err = query(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, MediaRemoteError::Unsupported));
        assert_eq!(err.to_string(), "MediaRemote is only available on macOS");
    }
}
