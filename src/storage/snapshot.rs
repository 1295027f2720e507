use super::{BlockCollection, CollectionError};
use crate::core::{Block, BlockId, BlockPatch, Properties};
use crc32fast::Hasher;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};
use serde::Serialize as SerdeSerialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Superblock and segment file of each of the two slots.
const SLOTS: [(&str, &str); 2] = [
    ("superblock_a", "segment_a"),
    ("superblock_b", "segment_b"),
];
const VERSION: u32 = 2;

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
struct Superblock {
    version: u32,
    generation: u64,
    segment_checksum: u32,
    segment_len: u64,
}

fn slot(generation: u64) -> (&'static str, &'static str) {
    SLOTS[(generation % 2) as usize]
}

/// On-disk form of a block. Ids are raw UUID bytes; enums and properties are
/// stored as their JSON spellings.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
struct BlockRecord {
    id: [u8; 16],
    parent_id: Option<[u8; 16]>,
    order: u32,
    block_type: String,
    variant: Option<String>,
    content: String,
    properties: String,
}

impl BlockRecord {
    fn from_block(block: &Block) -> Result<Self, CollectionError> {
        Ok(Self {
            id: *block.id.as_bytes(),
            parent_id: block.parent_id.map(|parent| *parent.as_bytes()),
            order: block.order,
            block_type: enum_name(block.block_type)?,
            variant: block.variant.map(enum_name).transpose()?,
            content: block.content.clone(),
            properties: serde_json::to_string(&block.properties)
                .map_err(|_| CollectionError::Serialization)?,
        })
    }

    fn into_block(self) -> Result<Block, CollectionError> {
        let properties: Properties = serde_json::from_str(&self.properties)
            .map_err(|_| CollectionError::Corrupt("properties"))?;
        Ok(Block {
            id: BlockId::from_bytes(self.id),
            parent_id: self.parent_id.map(BlockId::from_bytes),
            order: self.order,
            block_type: enum_from(self.block_type)?,
            content: self.content,
            variant: self.variant.map(enum_from).transpose()?,
            properties,
        })
    }
}

fn enum_name<T: SerdeSerialize>(value: T) -> Result<String, CollectionError> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(name)) => Ok(name),
        _ => Err(CollectionError::Serialization),
    }
}

fn enum_from<T: DeserializeOwned>(name: String) -> Result<T, CollectionError> {
    serde_json::from_value(serde_json::Value::String(name))
        .map_err(|_| CollectionError::Corrupt("unknown enum value"))
}

/// Crash-safe snapshot on disk, kept in two alternating slots.
///
/// Each write goes to the slot not holding the latest good snapshot: segment
/// first (temp file and rename), then that slot's superblock with the
/// generation, length and CRC32. Reads take the highest generation whose
/// segment still matches its superblock, so a write torn at any point falls
/// back to the previous snapshot.
#[derive(Debug)]
pub struct SnapshotStorage {
    root: PathBuf,
    generation: u64,
}

impl SnapshotStorage {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, CollectionError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let mut storage = Self {
            root,
            generation: 0,
        };
        if let Ok((generation, _)) = storage.latest() {
            storage.generation = generation;
        }
        Ok(storage)
    }

    /// Generation of the last snapshot written or found on open.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn write_snapshot(&mut self, payload: &[u8]) -> Result<(), CollectionError> {
        let generation = self.generation + 1;
        let (superblock_name, segment_name) = slot(generation);

        let segment_temp = self.root.join(format!("{segment_name}.tmp"));
        fs::write(&segment_temp, payload)?;
        fs::rename(&segment_temp, self.root.join(segment_name))?;

        let superblock = Superblock {
            version: VERSION,
            generation,
            segment_checksum: checksum_bytes(payload),
            segment_len: payload.len() as u64,
        };
        let encoded = rkyv::to_bytes::<rkyv::rancor::Error>(&superblock)
            .map_err(|_| CollectionError::Serialization)?;
        let superblock_temp = self.root.join(format!("{superblock_name}.tmp"));
        fs::write(&superblock_temp, &encoded)?;
        fs::rename(&superblock_temp, self.root.join(superblock_name))?;

        self.generation = generation;
        Ok(())
    }

    pub fn read_snapshot(&self) -> Result<Vec<u8>, CollectionError> {
        self.latest().map(|(_, segment)| segment)
    }

    fn latest(&self) -> Result<(u64, Vec<u8>), CollectionError> {
        let mut best: Option<(u64, Vec<u8>)> = None;
        let mut last_error = None;

        for (superblock_name, segment_name) in SLOTS {
            let bytes = match fs::read(self.root.join(superblock_name)) {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => {
                    last_error = Some(CollectionError::Io(err));
                    continue;
                }
            };
            match self.read_slot(&bytes, segment_name) {
                Ok((generation, segment)) => {
                    if best.as_ref().is_none_or(|(newest, _)| generation > *newest) {
                        best = Some((generation, segment));
                    }
                }
                Err(err) => last_error = Some(err),
            }
        }

        best.ok_or(last_error.unwrap_or(CollectionError::Missing))
    }

    fn read_slot(
        &self,
        superblock_bytes: &[u8],
        segment_name: &str,
    ) -> Result<(u64, Vec<u8>), CollectionError> {
        let superblock = rkyv::from_bytes::<Superblock, rkyv::rancor::Error>(&aligned(
            superblock_bytes,
        ))
        .map_err(|_| CollectionError::Corrupt("decode"))?;
        if superblock.version != VERSION {
            return Err(CollectionError::Corrupt("version"));
        }
        let segment = fs::read(self.root.join(segment_name))?;
        if segment.len() as u64 != superblock.segment_len {
            return Err(CollectionError::Corrupt("length mismatch"));
        }
        if checksum_bytes(&segment) != superblock.segment_checksum {
            return Err(CollectionError::Corrupt("checksum mismatch"));
        }
        Ok((superblock.generation, segment))
    }
}

fn checksum_bytes(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

fn aligned(bytes: &[u8]) -> AlignedVec {
    let mut buffer = AlignedVec::new();
    buffer.extend_from_slice(bytes);
    buffer
}

/// Block collection mirrored to a [`SnapshotStorage`] after every write.
#[derive(Debug)]
pub struct SnapshotCollection {
    storage: SnapshotStorage,
    blocks: BTreeMap<BlockId, Block>,
}

impl SnapshotCollection {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, CollectionError> {
        let storage = SnapshotStorage::open(root)?;
        let blocks = match storage.read_snapshot() {
            Ok(bytes) => {
                let records =
                    rkyv::from_bytes::<Vec<BlockRecord>, rkyv::rancor::Error>(&aligned(&bytes))
                        .map_err(|_| CollectionError::Corrupt("decode blocks"))?;
                records
                    .into_iter()
                    .map(|record| record.into_block().map(|block| (block.id, block)))
                    .collect::<Result<BTreeMap<_, _>, _>>()?
            }
            Err(CollectionError::Missing) => BTreeMap::new(),
            Err(err) => return Err(err),
        };
        Ok(Self { storage, blocks })
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    fn flush(&mut self) -> Result<(), CollectionError> {
        let records = self
            .blocks
            .values()
            .map(BlockRecord::from_block)
            .collect::<Result<Vec<_>, _>>()?;
        let encoded = rkyv::to_bytes::<rkyv::rancor::Error>(&records)
            .map_err(|_| CollectionError::Serialization)?;
        self.storage.write_snapshot(&encoded)
    }
}

impl BlockCollection for SnapshotCollection {
    fn get_all(&self) -> Result<Vec<Block>, CollectionError> {
        Ok(self.blocks.values().cloned().collect())
    }

    fn add(&mut self, block: &Block) -> Result<(), CollectionError> {
        self.blocks.insert(block.id, block.clone());
        self.flush()
    }

    fn bulk_add(&mut self, blocks: &[Block]) -> Result<(), CollectionError> {
        for block in blocks {
            self.blocks.insert(block.id, block.clone());
        }
        self.flush()
    }

    fn update(&mut self, id: BlockId, patch: &BlockPatch) -> Result<(), CollectionError> {
        let block = self
            .blocks
            .get_mut(&id)
            .ok_or(CollectionError::NotFound(id))?;
        block.apply_patch(patch);
        self.flush()
    }

    /// Flushes even when `id` is already gone, so replaying a delete whose
    /// flush failed still reaches the disk.
    fn delete(&mut self, id: BlockId) -> Result<(), CollectionError> {
        self.blocks.remove(&id);
        self.flush()
    }
}
