//! Raw declarations for the private MediaRemote framework.
//!
//! Everything here is resolved against `/System/Library/PrivateFrameworks/MediaRemote.framework`
//! at link time. Nothing is implemented locally.
#![allow(non_upper_case_globals, non_snake_case)]

use block2::DynBlock;
use objc2::runtime::AnyObject;
use objc2_foundation::NSString;
use std::ffi::{c_char, c_void};

/// Opaque `dispatch_queue_t`.
pub type DispatchQueue = *mut c_void;

/// `DISPATCH_QUEUE_SERIAL` is a null attribute.
pub const DISPATCH_QUEUE_SERIAL: *mut c_void = std::ptr::null_mut();

unsafe extern "C" {
    pub fn dispatch_queue_create(label: *const c_char, attr: *mut c_void) -> DispatchQueue;
    pub fn dispatch_release(object: DispatchQueue);
}

#[link(name = "MediaRemote", kind = "framework")]
unsafe extern "C" {
    // Notification names
    pub static kMRMediaRemoteNowPlayingInfoDidChangeNotification: &'static NSString;
    pub static kMRMediaRemoteNowPlayingPlaybackQueueDidChangeNotification: &'static NSString;
    pub static kMRMediaRemoteNowPlayingApplicationDidChangeNotification: &'static NSString;

    // Now-playing dictionary keys
    pub static kMRMediaRemoteNowPlayingInfoArtist: &'static NSString;
    pub static kMRMediaRemoteNowPlayingInfoAlbum: &'static NSString;
    pub static kMRMediaRemoteNowPlayingInfoTitle: &'static NSString;
    pub static kMRMediaRemoteNowPlayingInfoDuration: &'static NSString;
    pub static kMRMediaRemoteNowPlayingInfoElapsedTime: &'static NSString;
    pub static kMRMediaRemoteNowPlayingInfoPlaybackRate: &'static NSString;
    pub static kMRMediaRemoteNowPlayingInfoArtworkData: &'static NSString;

    pub fn MRMediaRemoteRegisterForNowPlayingNotifications(queue: DispatchQueue);
    pub fn MRMediaRemoteUnregisterForNowPlayingNotifications();
    /// The block receives a `CFDictionaryRef`, toll-free bridged to `NSDictionary`. May be null.
    pub fn MRMediaRemoteGetNowPlayingInfo(
        queue: DispatchQueue,
        block: &DynBlock<dyn Fn(*mut AnyObject)>,
    );
    pub fn MRMediaRemoteGetNowPlayingApplicationDisplayName(
        queue: DispatchQueue,
        block: &DynBlock<dyn Fn(*mut NSString)>,
    );
    /// The block receives an `MRNowPlayingClient` instance. May be nil.
    pub fn MRMediaRemoteGetNowPlayingClient(
        queue: DispatchQueue,
        block: &DynBlock<dyn Fn(*mut AnyObject)>,
    );
}
