//! Sets constants for the on-disk layouts
//!
//! All multi-byte integers are stored BigEndian.

pub const U16_SIZE: usize = 2;
pub const U32_SIZE: usize = 4;
pub const U64_SIZE: usize = 8;
pub const HANDLE_SIZE: usize = U64_SIZE;

/// Sentinel offset of a null handle (-1 as a signed 64-bit value)
pub const NULL_OFFSET: u64 = u64::MAX;

//for arena segment 0
pub const ARENA_TYPE_START: usize = 0;
pub const ARENA_TYPE_SIZE: usize = 32;

pub const ARENA_SEGMENT_SIZE_START: usize = ARENA_TYPE_START + ARENA_TYPE_SIZE;
pub const ARENA_SEGMENT_SIZE_SIZE: usize = U64_SIZE;

pub const ARENA_FREE_OFF_START: usize = ARENA_SEGMENT_SIZE_START + ARENA_SEGMENT_SIZE_SIZE;
pub const ARENA_FREE_OFF_SIZE: usize = U64_SIZE;

pub const ARENA_HEADER_START: usize = ARENA_FREE_OFF_START + ARENA_FREE_OFF_SIZE;

/// Allocations are rounded up to this many bytes
pub const ARENA_ALIGN: u64 = 8;

//for ArenaVec
pub const ARENA_VEC_BLOCK_LEN: usize = 256;
pub const ARENA_VEC_MAX_BLOCKS: usize = 512;

pub const ARENA_VEC_LEN_START: usize = 0;
pub const ARENA_VEC_DIR_START: usize = ARENA_VEC_LEN_START + U64_SIZE;
pub const ARENA_VEC_HEADER_SIZE: usize = ARENA_VEC_DIR_START + HANDLE_SIZE;

//for multibit tree nodes
pub const MULTIBIT_MAX_BITS: usize = 10;
pub const MULTIBIT_MAX_DEPTH: usize = 128;
pub const MULTIBIT_LEAF_SIZE: usize = 10;
pub const MULTIBIT_MIN_ZERO_PROB: f64 = 0.5;

pub const NODE_KIND_START: usize = 0;
pub const NODE_KIND_SIZE: usize = 1;

pub const NODE_BIT_COUNT_START: usize = NODE_KIND_START + NODE_KIND_SIZE;
pub const NODE_BIT_COUNT_SIZE: usize = 1;

pub const NODE_BITS_START: usize = NODE_BIT_COUNT_START + NODE_BIT_COUNT_SIZE;
pub const NODE_BITS_SIZE: usize = U16_SIZE * MULTIBIT_MAX_BITS;

pub const NODE_LEFT_START: usize = NODE_BITS_START + NODE_BITS_SIZE;
pub const NODE_RIGHT_START: usize = NODE_LEFT_START + U32_SIZE;
pub const NODE_LEAF_START_START: usize = NODE_RIGHT_START + U32_SIZE;
pub const NODE_LEAF_LEN_START: usize = NODE_LEAF_START_START + U32_SIZE;

pub const NODE_SIZE: usize = NODE_LEAF_LEN_START + U32_SIZE;

//for container records
pub const CONTAINER_COUNT_START: usize = 0;
pub const CONTAINER_NODE_COUNT_START: usize = CONTAINER_COUNT_START + U32_SIZE;
pub const CONTAINER_FPS_START: usize = CONTAINER_NODE_COUNT_START + U32_SIZE;
pub const CONTAINER_IDS_START: usize = CONTAINER_FPS_START + HANDLE_SIZE;
pub const CONTAINER_NODES_START: usize = CONTAINER_IDS_START + HANDLE_SIZE;

pub const CONTAINER_SIZE: usize = CONTAINER_NODES_START + HANDLE_SIZE;

//for similarity cells
pub const CELL_MIN_START: usize = 0;
pub const CELL_MAX_START: usize = CELL_MIN_START + U32_SIZE;
pub const CELL_INCREMENT_COUNT_START: usize = CELL_MAX_START + U32_SIZE;
pub const CELL_INCREMENT_FPS_START: usize = CELL_INCREMENT_COUNT_START + U32_SIZE;
pub const CELL_INCREMENT_IDS_START: usize = CELL_INCREMENT_FPS_START + HANDLE_SIZE;
pub const CELL_CONTAINERS_START: usize = CELL_INCREMENT_IDS_START + HANDLE_SIZE;

pub const CELL_SIZE: usize = CELL_CONTAINERS_START + HANDLE_SIZE;

//for the similarity table header kept in the arena header region
pub const TABLE_FP_SIZE_START: usize = 0;
pub const TABLE_MT_SIZE_START: usize = TABLE_FP_SIZE_START + U32_SIZE;
pub const TABLE_CELL_COUNT_START: usize = TABLE_MT_SIZE_START + U32_SIZE;
pub const TABLE_CELLS_START: usize = TABLE_CELL_COUNT_START + U32_SIZE;

pub const TABLE_HEADER_SIZE: usize = TABLE_CELLS_START + HANDLE_SIZE;

//for the compressed record offset file
pub const CF_OFFSET_START: usize = 0;
pub const CF_OFFSET_SIZE: usize = U32_SIZE;
pub const CF_LENGTH_START: usize = CF_OFFSET_START + CF_OFFSET_SIZE;
pub const CF_LENGTH_SIZE: usize = U16_SIZE;

pub const CF_ENTRY_SIZE: usize = CF_LENGTH_START + CF_LENGTH_SIZE;

/// Length stored for a removed record
pub const CF_TOMBSTONE: i16 = -1;

//for fingerprint storage meta side files
pub const META_FP_SIZE_START: usize = 0;
pub const META_BLOCK_SIZE_START: usize = META_FP_SIZE_START + U32_SIZE;
pub const META_BLOCK_COUNT_START: usize = META_BLOCK_SIZE_START + U32_SIZE;
pub const META_INCREMENT_COUNT_START: usize = META_BLOCK_COUNT_START + U64_SIZE;

pub const META_HEADER_SIZE: usize = META_INCREMENT_COUNT_START + U32_SIZE;

//for the exact hash file
pub const EXACT_HASH_SIZE: usize = U32_SIZE;

//for the object id mapping file
pub const ID_MAP_FIRST_FREE_START: usize = 0;
pub const ID_MAP_HEADER_SIZE: usize = ID_MAP_FIRST_FREE_START + U32_SIZE;
pub const ID_MAP_ENTRY_SIZE: usize = U32_SIZE;

/// External id stored for a removed object; never handed out
pub const NO_OBJECT_ID: u32 = u32::MAX;

//defaults
pub const DEFAULT_SUB_BLOCK_SIZE: usize = 8192;
pub const DEFAULT_SIM_BLOCK_SIZE: usize = 8192;
pub const DEFAULT_CF_BLOCK_SIZE: usize = 1048576;
pub const DEFAULT_SEGMENT_SIZE: u64 = 32 * 1024 * 1024;
pub const MAX_SEGMENT_SIZE: u64 = 512 * 1024 * 1024;
pub const DEFAULT_MT_SIZE: usize = 50000;
pub const DEFAULT_SMALL_BASE_SIZE: usize = 10000;

/// Upper bound on how many query bits the substructure screen intersects per pack
pub const SUB_MAX_SCREEN_BITS: usize = 15;
