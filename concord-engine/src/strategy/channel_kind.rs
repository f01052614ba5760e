use concord_core::MediaKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which local contribution a session carries and which remote media it surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelKind {
    DataOnly,
    AudioVideo,
    VoiceOnly,
    ScreenShare,
}

impl ChannelKind {
    /// Media kinds negotiated for this channel kind, in attach order.
    pub fn media_kinds(self) -> &'static [MediaKind] {
        match self {
            ChannelKind::DataOnly => &[],
            ChannelKind::VoiceOnly => &[MediaKind::Audio],
            ChannelKind::AudioVideo | ChannelKind::ScreenShare => {
                &[MediaKind::Audio, MediaKind::Video]
            }
        }
    }

    pub fn accepts(self, kind: MediaKind) -> bool {
        self.media_kinds().contains(&kind)
    }

    pub fn data_channel_label(self) -> &'static str {
        match self {
            ChannelKind::DataOnly => "data",
            _ => "metadata",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelKind::DataOnly => "data-only",
            ChannelKind::AudioVideo => "audio-video",
            ChannelKind::VoiceOnly => "voice-only",
            ChannelKind::ScreenShare => "screen-share",
        };
        f.write_str(name)
    }
}
