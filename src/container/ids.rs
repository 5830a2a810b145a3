//! Matroska element IDs the indexer cares about.

pub const EBML_HEADER: u32 = 0x1A45_DFA3;
pub const SEGMENT: u32 = 0x1853_8067;

// Top-level segment children
pub const SEEK_HEAD: u32 = 0x114D_9B74;
pub const INFO: u32 = 0x1549_A966;
pub const TRACKS: u32 = 0x1654_AE6B;
pub const CLUSTER: u32 = 0x1F43_B675;
pub const CUES: u32 = 0x1C53_BB6B;
pub const CHAPTERS: u32 = 0x1043_A770;
pub const TAGS: u32 = 0x1254_C367;
pub const ATTACHMENTS: u32 = 0x1941_A469;

// Cluster children
pub const TIMECODE: u32 = 0xE7;
pub const SIMPLE_BLOCK: u32 = 0xA3;
pub const BLOCK_GROUP: u32 = 0xA0;
pub const BLOCK: u32 = 0xA1;

// Global elements
pub const VOID: u32 = 0xEC;
pub const CRC32: u32 = 0xBF;

/// IDs that can only appear at segment level (or above). An unknown-sized
/// cluster ends where one of these begins.
pub const SEGMENT_LEVEL_IDS: &[u32] = &[
    EBML_HEADER,
    SEGMENT,
    SEEK_HEAD,
    INFO,
    TRACKS,
    CLUSTER,
    CUES,
    CHAPTERS,
    TAGS,
    ATTACHMENTS,
];

/// Human-readable name for diagnostics.
pub fn name(id: u32) -> &'static str {
    match id {
        EBML_HEADER => "EBML",
        SEGMENT => "Segment",
        SEEK_HEAD => "SeekHead",
        INFO => "Info",
        TRACKS => "Tracks",
        CLUSTER => "Cluster",
        CUES => "Cues",
        CHAPTERS => "Chapters",
        TAGS => "Tags",
        ATTACHMENTS => "Attachments",
        TIMECODE => "Timecode",
        SIMPLE_BLOCK => "SimpleBlock",
        BLOCK_GROUP => "BlockGroup",
        BLOCK => "Block",
        VOID => "Void",
        CRC32 => "CRC-32",
        _ => "Unknown",
    }
}
