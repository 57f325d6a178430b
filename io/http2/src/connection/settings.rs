//! Connection settings.

use crate::frame::{self, Setting, SettingId};
use crate::hpack::DEFAULT_MAX_HEADER_LIST_SIZE;

/// One side's SETTINGS values.
///
/// The connection keeps two of these: the values we advertise and the
/// values the server has advertised to us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub max_concurrent_streams: u32,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: u32,
    pub header_table_size: u32,
    pub enable_push: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_concurrent_streams: frame::DEFAULT_MAX_CONCURRENT_STREAMS,
            initial_window_size: frame::DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: frame::DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: DEFAULT_MAX_HEADER_LIST_SIZE as u32,
            header_table_size: frame::DEFAULT_HEADER_TABLE_SIZE,
            enable_push: false,
        }
    }
}

impl ConnectionSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Values assumed for a peer before its first SETTINGS frame arrives.
    pub fn peer_defaults() -> Self {
        Self {
            max_concurrent_streams: u32::MAX,
            max_header_list_size: u32::MAX,
            enable_push: true,
            ..Self::default()
        }
    }

    pub fn max_concurrent_streams(mut self, value: u32) -> Self {
        self.max_concurrent_streams = value;
        self
    }

    pub fn initial_window_size(mut self, value: u32) -> Self {
        self.initial_window_size = value.min(frame::MAX_WINDOW_SIZE);
        self
    }

    pub fn max_frame_size(mut self, value: u32) -> Self {
        self.max_frame_size = value.clamp(frame::DEFAULT_MAX_FRAME_SIZE, frame::MAX_FRAME_SIZE);
        self
    }

    pub fn max_header_list_size(mut self, value: u32) -> Self {
        self.max_header_list_size = value;
        self
    }

    /// The SETTINGS entries a client advertises.
    pub fn to_settings(&self) -> Vec<Setting> {
        vec![
            Setting::new(SettingId::EnablePush, self.enable_push as u32),
            Setting::new(SettingId::MaxConcurrentStreams, self.max_concurrent_streams),
            Setting::new(SettingId::InitialWindowSize, self.initial_window_size),
            Setting::new(SettingId::MaxFrameSize, self.max_frame_size),
            Setting::new(SettingId::MaxHeaderListSize, self.max_header_list_size),
        ]
    }
}
