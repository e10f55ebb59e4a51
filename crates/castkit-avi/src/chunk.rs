//! RIFF chunk bookkeeping.
//!
//! Chunks are held in an arena and addressed by [`ChunkId`]. A chunk starts
//! out open with a zero-filled header at its position in the stream; when it
//! is finished the writer seeks back, patches the header with the final
//! size, returns to the end of the stream and pads odd payloads to an even
//! length. Opening a chunk inside a composite first finishes the
//! composite's previously added child, before the new header is written, so
//! the old payload still ends at the stream cursor and its pad byte lands
//! ahead of the new header. At any time only the chunks on the path to the
//! most recently opened one are still open. Finishing is idempotent.
//!
//! All sizes are little-endian. A chunk whose size field would not fit into
//! 32 bits cannot be represented and finishing it fails.

use std::io::{Seek, SeekFrom, Write};

use byteorder::{LittleEndian, WriteBytesExt};

use castkit_media::FourCc;

use crate::error::{AviError, Result};

/// Handle to a chunk in a [`ChunkArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChunkId(usize);

#[derive(Debug)]
enum ChunkKind {
    /// Plain data chunk, payload written directly to the stream.
    Data,
    /// `RIFF` or `LIST` chunk with a type tag and children.
    Composite {
        list_type: FourCc,
        children: Vec<ChunkId>,
    },
    /// Data chunk whose payload size is known up front and zero-filled on
    /// open, so it can be patched later via seeks.
    Fixed { payload: u64 },
}

#[derive(Debug)]
struct ChunkNode {
    tag: FourCc,
    /// Position of the chunk header, relative to the start of the movie.
    offset: u64,
    /// Total chunk size including the 8 byte header, valid once finished.
    size: u64,
    finished: bool,
    kind: ChunkKind,
}

/// Chunk store bound to one output stream.
///
/// `base` is the absolute stream position the movie starts at; all chunk
/// offsets are relative to it.
#[derive(Debug)]
pub(crate) struct ChunkArena {
    nodes: Vec<ChunkNode>,
    base: u64,
}

const MAX_CHUNK_SIZE: u64 = u32::MAX as u64;

impl ChunkArena {
    pub fn new(base: u64) -> Self {
        ChunkArena {
            nodes: Vec::new(),
            base,
        }
    }

    pub fn position<W: Seek>(&self, w: &mut W) -> Result<u64> {
        Ok(w.stream_position()? - self.base)
    }

    pub fn offset(&self, id: ChunkId) -> u64 {
        self.nodes[id.0].offset
    }

    pub fn size(&self, id: ChunkId) -> u64 {
        self.nodes[id.0].size
    }

    fn push(&mut self, parent: Option<ChunkId>, node: ChunkNode) -> ChunkId {
        self.nodes.push(node);
        let id = ChunkId(self.nodes.len() - 1);
        if let Some(parent) = parent {
            if let ChunkKind::Composite { children, .. } = &mut self.nodes[parent.0].kind {
                children.push(id);
            }
        }
        id
    }

    /// Finishes `parent`'s most recently added child, while the stream
    /// cursor is still at that child's payload end.
    fn finish_last_child<W: Write + Seek>(
        &mut self,
        w: &mut W,
        parent: Option<ChunkId>,
    ) -> Result<()> {
        let Some(parent) = parent else {
            return Ok(());
        };
        let previous = match &self.nodes[parent.0].kind {
            ChunkKind::Composite { children, .. } => children.last().copied(),
            _ => return Err(AviError::InvalidArgument("not a composite chunk")),
        };
        if let Some(prev) = previous {
            self.finish(w, prev)?;
        }
        Ok(())
    }

    /// Opens a data chunk inside `parent`: writes a zero header, payload
    /// follows.
    pub fn open_data<W: Write + Seek>(
        &mut self,
        w: &mut W,
        parent: Option<ChunkId>,
        tag: FourCc,
    ) -> Result<ChunkId> {
        self.finish_last_child(w, parent)?;
        let offset = self.position(w)?;
        w.write_all(&[0u8; 8])?;
        Ok(self.push(
            parent,
            ChunkNode {
                tag,
                offset,
                size: 0,
                finished: false,
                kind: ChunkKind::Data,
            },
        ))
    }

    /// Opens a `RIFF` or `LIST` chunk.
    pub fn open_composite<W: Write + Seek>(
        &mut self,
        w: &mut W,
        parent: Option<ChunkId>,
        tag: FourCc,
        list_type: FourCc,
    ) -> Result<ChunkId> {
        self.finish_last_child(w, parent)?;
        let offset = self.position(w)?;
        w.write_all(&[0u8; 12])?;
        Ok(self.push(
            parent,
            ChunkNode {
                tag,
                offset,
                size: 0,
                finished: false,
                kind: ChunkKind::Composite {
                    list_type,
                    children: Vec::new(),
                },
            },
        ))
    }

    /// Opens a data chunk with a fixed-size zero-filled payload and leaves
    /// the stream positioned after it.
    pub fn open_fixed<W: Write + Seek>(
        &mut self,
        w: &mut W,
        parent: Option<ChunkId>,
        tag: FourCc,
        payload: u64,
    ) -> Result<ChunkId> {
        self.finish_last_child(w, parent)?;
        let offset = self.position(w)?;
        w.write_all(&tag.0)?;
        w.write_u32::<LittleEndian>(payload as u32)?;
        let zeros = [0u8; 256];
        let mut remaining = payload + payload % 2;
        while remaining > 0 {
            let n = remaining.min(zeros.len() as u64) as usize;
            w.write_all(&zeros[..n])?;
            remaining -= n as u64;
        }
        Ok(self.push(
            parent,
            ChunkNode {
                tag,
                offset,
                size: 8 + payload,
                finished: false,
                kind: ChunkKind::Fixed { payload },
            },
        ))
    }

    /// Seeks to the first payload byte of a fixed-size chunk.
    pub fn seek_to_data<W: Seek>(&self, w: &mut W, id: ChunkId) -> Result<()> {
        let node = &self.nodes[id.0];
        w.seek(SeekFrom::Start(self.base + node.offset + 8))?;
        Ok(())
    }

    /// Seeks past the end of a fixed-size chunk, including any pad byte.
    pub fn seek_to_end<W: Seek>(&self, w: &mut W, id: ChunkId) -> Result<()> {
        let node = &self.nodes[id.0];
        let payload = match node.kind {
            ChunkKind::Fixed { payload } => payload,
            _ => return Err(AviError::InvalidArgument("not a fixed-size chunk")),
        };
        w.seek(SeekFrom::Start(
            self.base + node.offset + 8 + payload + payload % 2,
        ))?;
        Ok(())
    }

    /// Finishes a chunk: patches its header and pads it to an even length.
    pub fn finish<W: Write + Seek>(&mut self, w: &mut W, id: ChunkId) -> Result<()> {
        if self.nodes[id.0].finished {
            return Ok(());
        }
        let composite = match &self.nodes[id.0].kind {
            ChunkKind::Fixed { .. } => {
                self.nodes[id.0].finished = true;
                return Ok(());
            }
            ChunkKind::Data => None,
            ChunkKind::Composite {
                list_type,
                children,
            } => Some((*list_type, children.clone())),
        };

        match composite {
            None => {
                let end = self.position(w)?;
                let node = &self.nodes[id.0];
                let payload = end - node.offset - 8;
                if payload > MAX_CHUNK_SIZE {
                    return Err(AviError::CapacityExceeded {
                        tag: node.tag,
                        size: payload,
                    });
                }
                w.seek(SeekFrom::Start(self.base + node.offset))?;
                w.write_all(&node.tag.0)?;
                w.write_u32::<LittleEndian>(payload as u32)?;
                w.seek(SeekFrom::Start(self.base + end))?;
                if payload % 2 == 1 {
                    w.write_all(&[0])?;
                }
                self.nodes[id.0].size = 8 + payload;
            }
            Some((list_type, children)) => {
                for child in &children {
                    self.finish(w, *child)?;
                }
                // Each child occupies its size rounded up to even.
                let mut size = 12u64;
                for child in &children {
                    let s = self.nodes[child.0].size;
                    size += s + s % 2;
                }
                if size - 8 > MAX_CHUNK_SIZE {
                    return Err(AviError::CapacityExceeded {
                        tag: self.nodes[id.0].tag,
                        size,
                    });
                }
                let end = w.seek(SeekFrom::End(0))?;
                let node = &self.nodes[id.0];
                w.seek(SeekFrom::Start(self.base + node.offset))?;
                w.write_all(&node.tag.0)?;
                w.write_u32::<LittleEndian>((size - 8) as u32)?;
                w.write_all(&list_type.0)?;
                w.seek(SeekFrom::Start(end))?;
                self.nodes[id.0].size = size;
            }
        }
        self.nodes[id.0].finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    const LIST: FourCc = FourCc(*b"LIST");

    #[test]
    fn data_chunk_header_is_patched_and_odd_payload_padded() {
        let mut w = Cursor::new(Vec::new());
        let mut arena = ChunkArena::new(0);
        let id = arena.open_data(&mut w, None, FourCc(*b"00dc")).unwrap();
        w.write_all(&[1, 2, 3]).unwrap();
        arena.finish(&mut w, id).unwrap();

        assert_eq!(
            w.into_inner(),
            [b'0', b'0', b'd', b'c', 3, 0, 0, 0, 1, 2, 3, 0]
        );
        assert_eq!(arena.size(id), 11);
    }

    #[test]
    fn finishing_twice_writes_nothing_more() {
        let mut w = Cursor::new(Vec::new());
        let mut arena = ChunkArena::new(0);
        let id = arena.open_data(&mut w, None, FourCc(*b"00dc")).unwrap();
        w.write_all(&[9]).unwrap();
        arena.finish(&mut w, id).unwrap();
        let first = w.get_ref().clone();
        arena.finish(&mut w, id).unwrap();
        assert_eq!(w.get_ref(), &first);
    }

    #[test]
    fn composite_size_sums_children_rounded_to_even() {
        let mut w = Cursor::new(Vec::new());
        let mut arena = ChunkArena::new(0);
        let list = arena
            .open_composite(&mut w, None, LIST, FourCc(*b"movi"))
            .unwrap();
        let a = arena.open_data(&mut w, Some(list), FourCc(*b"00dc")).unwrap();
        w.write_all(&[1, 2, 3]).unwrap(); // odd, padded to 4

        let b = arena.open_data(&mut w, Some(list), FourCc(*b"00dc")).unwrap(); // finishes a
        w.write_all(&[4, 5]).unwrap();
        arena.finish(&mut w, list).unwrap();

        // 12 header + (8+3+1) + (8+2)
        assert_eq!(arena.size(list), 34);
        assert_eq!(arena.size(a), 11);
        assert_eq!(arena.offset(b), 24);
        let bytes = w.into_inner();
        assert_eq!(&bytes[0..4], b"LIST");
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 26);
        assert_eq!(&bytes[8..12], b"movi");
        // The pad byte of `a` sits before the header of `b`.
        assert_eq!(bytes[23], 0);
        assert_eq!(&bytes[24..28], b"00dc");
        assert_eq!(bytes.len(), 34);
    }

    #[test]
    fn opening_a_sibling_finishes_the_previous_child() {
        let mut w = Cursor::new(Vec::new());
        let mut arena = ChunkArena::new(0);
        let list = arena
            .open_composite(&mut w, None, LIST, FourCc(*b"movi"))
            .unwrap();
        let a = arena.open_data(&mut w, Some(list), FourCc(*b"00db")).unwrap();
        w.write_all(&[7, 7]).unwrap();

        let b = arena.open_data(&mut w, Some(list), FourCc(*b"00dc")).unwrap();
        assert_eq!(arena.size(a), 10);
        assert_eq!(arena.offset(b), 22);

        let bytes = w.get_ref();
        assert_eq!(&bytes[12..16], b"00db");
        assert_eq!(u32::from_le_bytes(bytes[16..20].try_into().unwrap()), 2);
        assert_eq!(&bytes[22..26], b"00dc");
    }

    #[test]
    fn fixed_chunk_allows_seeking_back_into_its_payload() {
        let mut w = Cursor::new(Vec::new());
        let mut arena = ChunkArena::new(0);
        let id = arena.open_fixed(&mut w, None, FourCc(*b"avih"), 56).unwrap();
        assert_eq!(w.get_ref().len(), 64);

        arena.seek_to_data(&mut w, id).unwrap();
        w.write_all(&[0xaa]).unwrap();
        arena.seek_to_end(&mut w, id).unwrap();
        assert_eq!(w.stream_position().unwrap(), 64);
        assert_eq!(w.get_ref()[8], 0xaa);

        arena.finish(&mut w, id).unwrap();
        let bytes = w.into_inner();
        assert_eq!(&bytes[0..4], b"avih");
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 56);
    }

    #[test]
    fn offsets_are_relative_to_the_arena_base() {
        let mut w = Cursor::new(vec![0u8; 16]);
        w.seek(SeekFrom::Start(16)).unwrap();
        let mut arena = ChunkArena::new(16);
        let id = arena.open_data(&mut w, None, FourCc(*b"00dc")).unwrap();
        assert_eq!(arena.offset(id), 0);
        w.write_all(&[1]).unwrap();
        arena.finish(&mut w, id).unwrap();
        assert_eq!(&w.into_inner()[16..20], b"00dc");
    }
}
