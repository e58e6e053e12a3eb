use block2::RcBlock;
use objc2::rc::Retained;
use objc2::runtime::AnyObject;
use objc2::{msg_send, sel};
use objc2_foundation::{NSData, NSDictionary, NSNotificationCenter, NSNumber, NSString};
use std::ffi::CStr;
use std::sync::{Arc, mpsc};
use std::time::Duration;
use tracing::debug;

use super::sys::{self, DispatchQueue};
use super::{MediaRemoteError, NowPlayingQuery};
use crate::models::NowPlayingInfo;

const QUEUE_LABEL: &CStr = c"media-listener.mediaremote";

/// The three notifications MediaRemote posts once registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    InfoDidChange,
    PlaybackQueueDidChange,
    ApplicationDidChange,
}

impl Notification {
    pub const ALL: [Notification; 3] = [
        Notification::InfoDidChange,
        Notification::PlaybackQueueDidChange,
        Notification::ApplicationDidChange,
    ];

    fn name(self) -> &'static NSString {
        // SAFETY: the statics are immutable constants exported by MediaRemote.
        unsafe {
            match self {
                Notification::InfoDidChange => sys::kMRMediaRemoteNowPlayingInfoDidChangeNotification,
                Notification::PlaybackQueueDidChange => {
                    sys::kMRMediaRemoteNowPlayingPlaybackQueueDidChangeNotification
                }
                Notification::ApplicationDidChange => {
                    sys::kMRMediaRemoteNowPlayingApplicationDidChangeNotification
                }
            }
        }
    }
}

/// A private serial dispatch queue, released when the last handle goes away.
#[derive(Debug)]
struct SerialQueue(DispatchQueue);

// SAFETY: dispatch queues are thread-safe objects.
unsafe impl Send for SerialQueue {}
unsafe impl Sync for SerialQueue {}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        // SAFETY: we own the one reference from dispatch_queue_create.
        unsafe { sys::dispatch_release(self.0) };
    }
}

/// Handle on MediaRemote bound to its own serial dispatch queue.
///
/// Completion callbacks run one at a time on that queue, not on the caller's thread.
#[derive(Debug, Clone)]
pub struct MediaRemote {
    queue: Arc<SerialQueue>,
}

impl Default for MediaRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaRemote {
    pub fn new() -> Self {
        // SAFETY: the label is a NUL-terminated static; a null attribute makes a serial queue.
        let queue = unsafe {
            sys::dispatch_queue_create(QUEUE_LABEL.as_ptr(), sys::DISPATCH_QUEUE_SERIAL)
        };
        Self {
            queue: Arc::new(SerialQueue(queue)),
        }
    }

    fn queue(&self) -> DispatchQueue {
        self.queue.0
    }

    pub fn register_notifications(&self) {
        // SAFETY: the queue stays alive as long as this handle.
        unsafe { sys::MRMediaRemoteRegisterForNowPlayingNotifications(self.queue()) };
    }

    pub fn unregister_notifications(&self) {
        // SAFETY: no arguments; safe to call even when not registered.
        unsafe { sys::MRMediaRemoteUnregisterForNowPlayingNotifications() };
    }

    /// `callback` receives `None` when nothing is playing or access is denied.
    pub fn now_playing_info<F>(&self, callback: F)
    where
        F: Fn(Option<NowPlayingInfo>) + Send + Sync + 'static,
    {
        let block = RcBlock::new(move |dict: *mut AnyObject| {
            // SAFETY: MediaRemote hands us a CFDictionaryRef or null.
            callback(unsafe { decode_info(dict) });
        });
        // SAFETY: the framework copies the block before returning.
        unsafe { sys::MRMediaRemoteGetNowPlayingInfo(self.queue(), &block) };
    }

    pub fn application_display_name<F>(&self, callback: F)
    where
        F: Fn(Option<String>) + Send + Sync + 'static,
    {
        let block = RcBlock::new(move |name: *mut NSString| {
            // SAFETY: the pointer is an NSString or nil.
            let name = unsafe { name.as_ref() }.map(|s| s.to_string());
            callback(name.filter(|n| !n.is_empty()));
        });
        // SAFETY: see `now_playing_info`.
        unsafe { sys::MRMediaRemoteGetNowPlayingApplicationDisplayName(self.queue(), &block) };
    }

    /// `callback` receives the bundle identifier of the now-playing client, if any.
    pub fn now_playing_client<F>(&self, callback: F)
    where
        F: Fn(Option<String>) + Send + Sync + 'static,
    {
        let block = RcBlock::new(move |client: *mut AnyObject| {
            // SAFETY: the pointer is an MRNowPlayingClient or nil.
            callback(unsafe { client_bundle_id(client) });
        });
        // SAFETY: see `now_playing_info`.
        unsafe { sys::MRMediaRemoteGetNowPlayingClient(self.queue(), &block) };
    }

    /// Observe one of the MediaRemote notifications on the default center.
    /// The observation ends when the returned value is dropped.
    pub fn observe<F>(&self, notification: Notification, callback: F) -> NotificationObserver
    where
        F: Fn() + Send + Sync + 'static,
    {
        // SAFETY: the default center is a process-wide singleton.
        let center = unsafe { NSNotificationCenter::defaultCenter() };
        let block = RcBlock::new(move |_notification: *mut AnyObject| callback());

        // SAFETY: a nil queue delivers on the posting thread; the center retains the block.
        let token: Retained<AnyObject> = unsafe {
            msg_send![
                &*center,
                addObserverForName: notification.name(),
                object: None::<&AnyObject>,
                queue: None::<&AnyObject>,
                usingBlock: &*block
            ]
        };

        debug!("Observing {notification:?}");
        NotificationObserver { center, token }
    }

    /// Synchronous query used by one-shot callers.
    pub fn query(&self, timeout: Duration) -> Result<NowPlayingQuery, MediaRemoteError> {
        let (tx, rx) = mpsc::channel();
        self.now_playing_info(move |info| {
            let _ = tx.send(info);
        });
        let info = rx
            .recv_timeout(timeout)
            .map_err(|_| MediaRemoteError::Timeout("now-playing info"))?;

        let (tx, rx) = mpsc::channel();
        self.application_display_name(move |name| {
            let _ = tx.send(name);
        });
        let app_name = rx
            .recv_timeout(timeout)
            .map_err(|_| MediaRemoteError::Timeout("application display name"))?;

        let (tx, rx) = mpsc::channel();
        self.now_playing_client(move |bundle_id| {
            let _ = tx.send(bundle_id);
        });
        let bundle_id = rx
            .recv_timeout(timeout)
            .map_err(|_| MediaRemoteError::Timeout("now-playing client"))?;

        Ok(NowPlayingQuery {
            info,
            app_name,
            bundle_id,
        })
    }
}

#[derive(Debug)]
pub struct NotificationObserver {
    center: Retained<NSNotificationCenter>,
    token: Retained<AnyObject>,
}

impl Drop for NotificationObserver {
    fn drop(&mut self) {
        // SAFETY: token came from addObserverForName on this same center.
        let _: () = unsafe { msg_send![&*self.center, removeObserver: &*self.token] };
    }
}

unsafe fn decode_info(dict: *mut AnyObject) -> Option<NowPlayingInfo> {
    // SAFETY: CFDictionaryRef is toll-free bridged with NSDictionary.
    let dict = unsafe { dict.cast::<NSDictionary<NSString, AnyObject>>().as_ref() }?;

    // SAFETY: the key statics are immutable constants exported by MediaRemote.
    let info = unsafe {
        NowPlayingInfo {
            title: string_value(dict, sys::kMRMediaRemoteNowPlayingInfoTitle),
            artist: string_value(dict, sys::kMRMediaRemoteNowPlayingInfoArtist),
            album: string_value(dict, sys::kMRMediaRemoteNowPlayingInfoAlbum),
            duration: number_value(dict, sys::kMRMediaRemoteNowPlayingInfoDuration),
            elapsed: number_value(dict, sys::kMRMediaRemoteNowPlayingInfoElapsedTime),
            playback_rate: number_value(dict, sys::kMRMediaRemoteNowPlayingInfoPlaybackRate),
            artwork_bytes: data_len(dict, sys::kMRMediaRemoteNowPlayingInfoArtworkData),
        }
    };

    Some(info)
}

fn value(dict: &NSDictionary<NSString, AnyObject>, key: &NSString) -> Option<Retained<AnyObject>> {
    // SAFETY: keys are NSStrings; values are whatever the player stored.
    unsafe { dict.objectForKey(key) }
}

fn string_value(dict: &NSDictionary<NSString, AnyObject>, key: &NSString) -> Option<String> {
    value(dict, key)?
        .downcast::<NSString>()
        .ok()
        .map(|s| s.to_string())
}

fn number_value(dict: &NSDictionary<NSString, AnyObject>, key: &NSString) -> Option<f64> {
    value(dict, key)?
        .downcast::<NSNumber>()
        .ok()
        .map(|n| n.as_f64())
}

fn data_len(dict: &NSDictionary<NSString, AnyObject>, key: &NSString) -> Option<usize> {
    value(dict, key)?.downcast::<NSData>().ok().map(|d| d.len())
}

unsafe fn client_bundle_id(client: *mut AnyObject) -> Option<String> {
    // SAFETY: caller passes an object pointer or nil.
    let client = unsafe { client.as_ref() }?;

    // MRNowPlayingClient is undocumented; check before sending.
    let responds: bool = unsafe { msg_send![client, respondsToSelector: sel!(bundleIdentifier)] };
    if !responds {
        return None;
    }

    let bundle_id: Option<Retained<NSString>> = unsafe { msg_send![client, bundleIdentifier] };
    bundle_id.map(|s| s.to_string()).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_thread_safe<T: Send + Sync>() {}

    #[test]
    fn test_handle_is_shareable_across_queues() {
        // Callbacks run on the dispatch queue, so the handle they capture must cross threads.
        assert_thread_safe::<MediaRemote>();
        let remote = MediaRemote::new();
        let clone = remote.clone();
        std::thread::spawn(move || drop(clone)).join().unwrap();
        assert_eq!(Arc::strong_count(&remote.queue), 1);
    }
}
