//! Chunked structure-of-arrays storage for one archetype.
//!
//! An [`ArchetypeBuffer`] holds every entity of one archetype in a list of
//! fixed-capacity [`ArchetypeBufferChunk`]s. Each chunk owns one densely
//! packed [`Column`] per component type plus an array of slot descriptors
//! used as a free list.
//!
//! Slots are addressed by a stable *key* that survives compaction; the
//! physical row behind a key changes whenever the chunk closes gaps left by
//! returned slots. Entities therefore store `(chunk, key)` pairs and never
//! raw row numbers.
//!
//! # Layout
//!
//! Column bytes live in 16-byte aligned blocks and are reinterpreted as typed
//! slices through `bytemuck`, so any [`Component`] with alignment up to
//! [`MAX_COMPONENT_ALIGN`](crate::component::MAX_COMPONENT_ALIGN) can be
//! viewed without copying.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::archetype::Archetype;
use crate::component::{self, Component, ComponentType, ComponentTypeId};

// ---------------------------------------------------------------------------
// Block -- aligned backing unit for column bytes
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
#[repr(C, align(16))]
struct Block([u8; 16]);

// SAFETY: a single byte array filling the whole aligned size; no padding and
// every bit pattern is valid.
unsafe impl bytemuck::Zeroable for Block {}
// SAFETY: see above.
unsafe impl bytemuck::Pod for Block {}

const BLOCK_SIZE: usize = std::mem::size_of::<Block>();

// ---------------------------------------------------------------------------
// Column
// ---------------------------------------------------------------------------

/// Fixed-stride byte array holding one component type for every row of a
/// chunk.
pub(crate) struct Column {
    component: ComponentType,
    blocks: Vec<Block>,
}

impl Column {
    fn new(component: ComponentType, rows: usize) -> Self {
        let bytes = component.size * rows;
        Self {
            component,
            blocks: vec![Block([0; BLOCK_SIZE]); bytes.div_ceil(BLOCK_SIZE)],
        }
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.blocks)
    }

    #[inline]
    fn bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.blocks)
    }

    #[inline]
    pub(crate) fn row(&self, row: usize) -> &[u8] {
        let size = self.component.size;
        &self.bytes()[row * size..(row + 1) * size]
    }

    #[inline]
    pub(crate) fn row_mut(&mut self, row: usize) -> &mut [u8] {
        let size = self.component.size;
        &mut self.bytes_mut()[row * size..(row + 1) * size]
    }

    /// The first `len` rows as a typed slice. `T` must be the column's type.
    #[inline]
    pub(crate) fn typed<T: Component>(&self, len: usize) -> &[T] {
        self.debug_check_type::<T>();
        bytemuck::cast_slice(&self.bytes()[..len * self.component.size])
    }

    /// The first `len` rows as a mutable typed slice. `T` must be the
    /// column's type.
    #[inline]
    pub(crate) fn typed_mut<T: Component>(&mut self, len: usize) -> &mut [T] {
        self.debug_check_type::<T>();
        let size = self.component.size;
        bytemuck::cast_slice_mut(&mut self.bytes_mut()[..len * size])
    }

    #[inline]
    fn debug_check_type<T: Component>(&self) {
        debug_assert_eq!(
            std::mem::size_of::<T>(),
            self.component.size,
            "column holds {}, not {}",
            self.component.name,
            std::any::type_name::<T>()
        );
    }

    fn move_row(&mut self, from: usize, to: usize) {
        let size = self.component.size;
        self.bytes_mut()
            .copy_within(from * size..(from + 1) * size, to * size);
    }

    fn zero_from(&mut self, row: usize) {
        let start = row * self.component.size;
        self.bytes_mut()[start..].fill(0);
    }
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Column")
            .field("component", &self.component.name)
            .field("bytes", &(self.blocks.len() * BLOCK_SIZE))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ColumnLayout -- component type id -> column index
// ---------------------------------------------------------------------------

/// Per-archetype mapping from component type id to column position, built
/// once when the buffer is created and shared by all of its chunks.
#[derive(Debug)]
pub(crate) struct ColumnLayout {
    types: Vec<ComponentType>,
    column_of: Vec<Option<usize>>,
}

impl ColumnLayout {
    fn new(types: Vec<ComponentType>) -> Self {
        let table_len = types.iter().map(|t| t.id.index() + 1).max().unwrap_or(0);
        let mut column_of = vec![None; table_len];
        for (column, ty) in types.iter().enumerate() {
            column_of[ty.id.index()] = Some(column);
        }
        Self { types, column_of }
    }

    #[inline]
    pub(crate) fn column_of(&self, id: ComponentTypeId) -> Option<usize> {
        self.column_of.get(id.index()).copied().flatten()
    }

    #[inline]
    fn column_of_type<T: Component>(&self) -> Option<usize> {
        self.column_of(component::lookup::<T>()?)
    }

    pub(crate) fn types(&self) -> &[ComponentType] {
        &self.types
    }
}

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

/// Stable identity of a chunk within its buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(u32);

/// An entity's storage position: a chunk plus a slot key inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    pub chunk: ChunkId,
    pub key: u32,
}

#[derive(Debug, Clone, Copy)]
struct SlotState {
    /// Physical row currently backing this slot.
    row: u32,
    taken: bool,
    /// Entity index occupying the slot while taken.
    owner: u32,
}

// ---------------------------------------------------------------------------
// ArchetypeBufferChunk
// ---------------------------------------------------------------------------

/// A fixed-capacity structure-of-arrays block.
///
/// Invariant: `slots[order[r]].row == r` for every row `r`. While
/// `requires_compacting` is false, rows `0..used_slots` are exactly the
/// taken slots.
pub struct ArchetypeBufferChunk {
    id: ChunkId,
    layout: Arc<ColumnLayout>,
    used_slots: usize,
    requires_compacting: bool,
    /// Indexed by slot key.
    slots: Vec<SlotState>,
    /// Slot keys in physical row order.
    order: Vec<u32>,
    columns: Vec<Column>,
}

impl ArchetypeBufferChunk {
    fn new(id: ChunkId, layout: Arc<ColumnLayout>, capacity: usize) -> Self {
        let slots = (0..capacity as u32)
            .map(|row| SlotState {
                row,
                taken: false,
                owner: u32::MAX,
            })
            .collect();
        let columns = layout
            .types()
            .iter()
            .map(|ty| Column::new(*ty, capacity))
            .collect();
        Self {
            id,
            layout,
            used_slots: 0,
            requires_compacting: false,
            slots,
            order: (0..capacity as u32).collect(),
            columns,
        }
    }

    #[inline]
    pub fn id(&self) -> ChunkId {
        self.id
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of taken slots.
    #[inline]
    pub fn used_slots(&self) -> usize {
        self.used_slots
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.used_slots == self.capacity()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.used_slots == 0
    }

    /// Whether a slot was returned since the last compaction.
    #[inline]
    pub fn requires_compacting(&self) -> bool {
        self.requires_compacting
    }

    /// Claim a free slot for `owner`, or `None` when the chunk is full.
    ///
    /// Pending returns are compacted first so the next row past the live
    /// prefix is guaranteed free.
    pub fn try_get_slot(&mut self, owner: u32) -> Option<u32> {
        if self.is_full() {
            return None;
        }
        if self.requires_compacting {
            self.compact();
        }
        Some(self.claim_next(owner))
    }

    fn claim_next(&mut self, owner: u32) -> u32 {
        let key = self.order[self.used_slots];
        let state = &mut self.slots[key as usize];
        debug_assert!(!state.taken, "slot {key} handed out twice");
        state.taken = true;
        state.owner = owner;
        self.used_slots += 1;
        key
    }

    /// Free the slot with the given key. Returns `false` if it was not taken.
    pub fn return_slot(&mut self, key: u32) -> bool {
        match self.slots.get_mut(key as usize) {
            Some(state) if state.taken => {
                state.taken = false;
                state.owner = u32::MAX;
                self.used_slots -= 1;
                self.requires_compacting = true;
                true
            }
            _ => false,
        }
    }

    /// Close the gaps left by returned slots.
    ///
    /// Taken slots are stably partitioned to the front, their rows copied
    /// into the contiguous prefix, the tail zeroed and every slot's row
    /// rewritten to its new position. Returns `false` without touching any
    /// data when nothing was returned since the last compaction.
    pub fn compact(&mut self) -> bool {
        if !self.requires_compacting {
            return false;
        }

        let (mut packed, free): (Vec<u32>, Vec<u32>) = self
            .order
            .iter()
            .partition(|&&key| self.slots[key as usize].taken);
        debug_assert_eq!(packed.len(), self.used_slots);

        // Taken rows keep their relative order, so each source row is at or
        // past its destination and a forward copy never clobbers live data.
        for (dest, &key) in packed.iter().enumerate() {
            let source = self.slots[key as usize].row as usize;
            if source != dest {
                for column in &mut self.columns {
                    column.move_row(source, dest);
                }
            }
        }
        for column in &mut self.columns {
            column.zero_from(self.used_slots);
        }

        packed.extend(free);
        for (row, &key) in packed.iter().enumerate() {
            self.slots[key as usize].row = row as u32;
        }
        self.order = packed;
        self.requires_compacting = false;
        true
    }

    /// Physical row currently backing slot `key`.
    #[inline]
    pub fn row_of(&self, key: u32) -> usize {
        self.slots[key as usize].row as usize
    }

    /// Whether slot `key` is currently taken.
    pub fn is_taken(&self, key: u32) -> bool {
        self.slots.get(key as usize).is_some_and(|s| s.taken)
    }

    /// Zero-copy view of component `T` for the live rows.
    ///
    /// Must only be called on a compacted chunk; otherwise the span may
    /// contain freed rows. Returns `None` if the archetype lacks `T`.
    pub fn component_span<T: Component>(&self) -> Option<&[T]> {
        debug_assert!(!self.requires_compacting, "component span of an uncompacted chunk");
        let column = self.layout.column_of_type::<T>()?;
        Some(self.columns[column].typed::<T>(self.used_slots))
    }

    /// Mutable zero-copy view of component `T` for the live rows.
    pub fn component_span_mut<T: Component>(&mut self) -> Option<&mut [T]> {
        debug_assert!(!self.requires_compacting, "component span of an uncompacted chunk");
        let column = self.layout.column_of_type::<T>()?;
        let len = self.used_slots;
        Some(self.columns[column].typed_mut::<T>(len))
    }

    /// Entity indices occupying the live rows, in row order. Only meaningful
    /// on a compacted chunk.
    pub fn owners(&self) -> impl Iterator<Item = u32> + '_ {
        self.order[..self.used_slots]
            .iter()
            .map(|&key| self.slots[key as usize].owner)
    }

    /// `(key, owner)` for every taken slot, compacted or not.
    fn taken_slots(&self) -> Vec<(u32, u32)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.taken)
            .map(|(key, s)| (key as u32, s.owner))
            .collect()
    }

    #[inline]
    pub(crate) fn column(&self, index: usize) -> &Column {
        &self.columns[index]
    }

    #[inline]
    pub(crate) fn column_mut(&mut self, index: usize) -> &mut Column {
        &mut self.columns[index]
    }

    #[inline]
    pub(crate) fn columns_mut(&mut self) -> &mut [Column] {
        &mut self.columns
    }
}

impl fmt::Debug for ArchetypeBufferChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchetypeBufferChunk")
            .field("id", &self.id)
            .field("used_slots", &self.used_slots)
            .field("capacity", &self.capacity())
            .field("requires_compacting", &self.requires_compacting)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ArchetypeBuffer
// ---------------------------------------------------------------------------

/// A slot that moved to a different chunk during consolidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    /// Entity index that owns the slot.
    pub owner: u32,
    pub from: Slot,
    pub to: Slot,
}

/// All chunks of one archetype.
///
/// Allocation scans chunks front to back; a chunk that fills up is moved to
/// the end and a brand-new chunk is inserted at the front, so partially
/// used chunks are found first.
pub struct ArchetypeBuffer {
    archetype: Archetype,
    layout: Arc<ColumnLayout>,
    chunk_capacity: usize,
    chunks: Vec<ArchetypeBufferChunk>,
    /// ChunkId -> position in `chunks`.
    positions: HashMap<ChunkId, usize>,
    next_chunk_id: u32,
    len: usize,
}

impl ArchetypeBuffer {
    /// Create an empty buffer whose chunks hold `chunk_capacity` rows.
    ///
    /// # Panics
    ///
    /// Panics if `chunk_capacity` is zero.
    pub fn new(archetype: Archetype, chunk_capacity: usize) -> Self {
        assert!(chunk_capacity > 0, "chunk capacity must be non-zero");
        let layout = Arc::new(ColumnLayout::new(archetype.types()));
        Self {
            archetype,
            layout,
            chunk_capacity,
            chunks: Vec::new(),
            positions: HashMap::new(),
            next_chunk_id: 0,
            len: 0,
        }
    }

    #[inline]
    pub fn archetype(&self) -> &Archetype {
        &self.archetype
    }

    /// Live rows across all chunks.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    #[inline]
    pub fn chunk_capacity(&self) -> usize {
        self.chunk_capacity
    }

    /// Chunks in their current order.
    pub fn chunks(&self) -> &[ArchetypeBufferChunk] {
        &self.chunks
    }

    pub(crate) fn chunks_mut(&mut self) -> &mut [ArchetypeBufferChunk] {
        &mut self.chunks
    }

    pub(crate) fn layout(&self) -> &ColumnLayout {
        &self.layout
    }

    pub fn chunk(&self, id: ChunkId) -> Option<&ArchetypeBufferChunk> {
        self.positions.get(&id).map(|&pos| &self.chunks[pos])
    }

    fn chunk_mut(&mut self, id: ChunkId) -> Option<&mut ArchetypeBufferChunk> {
        let pos = *self.positions.get(&id)?;
        Some(&mut self.chunks[pos])
    }

    fn reindex(&mut self) {
        self.positions.clear();
        self.positions
            .extend(self.chunks.iter().enumerate().map(|(pos, c)| (c.id, pos)));
    }

    /// Claim a free slot for entity index `owner`, allocating a chunk if
    /// every existing one is full.
    pub fn get_slot(&mut self, owner: u32) -> Slot {
        self.len += 1;
        for pos in 0..self.chunks.len() {
            let chunk = &mut self.chunks[pos];
            let Some(key) = chunk.try_get_slot(owner) else {
                continue;
            };
            let slot = Slot { chunk: chunk.id, key };
            if chunk.is_full() && pos + 1 != self.chunks.len() {
                let full = self.chunks.remove(pos);
                self.chunks.push(full);
                self.reindex();
            }
            return slot;
        }

        let id = ChunkId(self.next_chunk_id);
        self.next_chunk_id += 1;
        let mut chunk = ArchetypeBufferChunk::new(id, Arc::clone(&self.layout), self.chunk_capacity);
        let key = chunk.claim_next(owner);
        tracing::debug!(
            archetype = self.archetype.id().0,
            chunk = id.0,
            chunks = self.chunks.len() + 1,
            "allocated archetype chunk"
        );
        if chunk.is_full() {
            self.chunks.push(chunk);
        } else {
            self.chunks.insert(0, chunk);
        }
        self.reindex();
        Slot { chunk: id, key }
    }

    /// Free `slot`. Returns `false` if it does not name a taken slot of this
    /// buffer.
    pub fn return_slot(&mut self, slot: Slot) -> bool {
        let returned = self
            .chunk_mut(slot.chunk)
            .is_some_and(|chunk| chunk.return_slot(slot.key));
        if returned {
            self.len -= 1;
        }
        returned
    }

    /// Compact every chunk. Returns how many chunks moved data.
    pub fn compact_all(&mut self) -> usize {
        self.chunks.iter_mut().map(|c| c.compact()).filter(|&moved| moved).count()
    }

    /// Reorder chunks by occupancy: full chunks first, then partially used
    /// chunks from most to least occupied, then empty ones.
    pub fn sort_by_used_slots(&mut self) {
        let capacity = self.chunk_capacity;
        self.chunks.sort_by_key(|c| {
            let class = match c.used_slots() {
                n if n == capacity => 0,
                0 => 2,
                _ => 1,
            };
            (class, Reverse(c.used_slots()))
        });
        self.reindex();
    }

    /// Drop chunks that hold no rows. Returns how many were dropped.
    pub fn trim(&mut self) -> usize {
        let before = self.chunks.len();
        self.chunks.retain(|c| !c.is_empty());
        self.reindex();
        before - self.chunks.len()
    }

    /// Move rows out of the sparsest chunks into free slots of the densest
    /// ones until the buffer spans the minimum number of non-empty chunks.
    ///
    /// Emptied chunks are left in place for [`trim`](Self::trim). Returns
    /// every relocated slot so owners can be re-pointed.
    pub fn consolidate(&mut self) -> Vec<Relocation> {
        let needed = self.len.div_ceil(self.chunk_capacity);
        let occupied = self.chunks.iter().filter(|c| !c.is_empty()).count();
        if occupied <= needed {
            return Vec::new();
        }

        self.chunks.sort_by_key(|c| Reverse(c.used_slots()));
        let mut relocations = Vec::new();
        let (receivers, donors) = self.chunks.split_at_mut(needed);
        let mut target = 0;
        for donor in donors.iter_mut() {
            for (from_key, owner) in donor.taken_slots() {
                while receivers[target].is_full() {
                    target += 1;
                }
                let receiver = &mut receivers[target];
                let Some(to_key) = receiver.try_get_slot(owner) else {
                    continue;
                };
                let from_row = donor.row_of(from_key);
                let to_row = receiver.row_of(to_key);
                for column in 0..donor.columns.len() {
                    receiver
                        .column_mut(column)
                        .row_mut(to_row)
                        .copy_from_slice(donor.column(column).row(from_row));
                }
                donor.return_slot(from_key);
                relocations.push(Relocation {
                    owner,
                    from: Slot { chunk: donor.id, key: from_key },
                    to: Slot { chunk: receiver.id, key: to_key },
                });
            }
        }
        self.reindex();
        relocations
    }

    /// Typed read of one slot's component.
    pub fn get<T: Component>(&self, slot: Slot) -> Option<&T> {
        let column = self.layout.column_of_type::<T>()?;
        let chunk = self.chunk(slot.chunk)?;
        if !chunk.is_taken(slot.key) {
            return None;
        }
        let bytes = chunk.column(column).row(chunk.row_of(slot.key));
        Some(bytemuck::from_bytes(bytes))
    }

    /// Typed mutable access to one slot's component.
    pub fn get_mut<T: Component>(&mut self, slot: Slot) -> Option<&mut T> {
        let column = self.layout.column_of_type::<T>()?;
        let chunk = self.chunk_mut(slot.chunk)?;
        if !chunk.is_taken(slot.key) {
            return None;
        }
        let row = chunk.row_of(slot.key);
        Some(bytemuck::from_bytes_mut(chunk.column_mut(column).row_mut(row)))
    }
}

impl fmt::Debug for ArchetypeBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchetypeBuffer")
            .field("archetype", &self.archetype.id())
            .field("len", &self.len)
            .field("chunks", &self.chunks)
            .finish()
    }
}

/// Copy every component present in both archetypes from `src_slot` to
/// `dst_slot`. Components only the destination has are left untouched.
pub(crate) fn copy_shared_components(
    src: &ArchetypeBuffer,
    src_slot: Slot,
    dst: &mut ArchetypeBuffer,
    dst_slot: Slot,
) {
    let (Some(src_chunk), Some(dst_pos)) =
        (src.chunk(src_slot.chunk), dst.positions.get(&dst_slot.chunk).copied())
    else {
        return;
    };
    let src_row = src_chunk.row_of(src_slot.key);
    let dst_chunk = &mut dst.chunks[dst_pos];
    let dst_row = dst_chunk.row_of(dst_slot.key);
    for (dst_column, ty) in dst.layout.types.iter().enumerate() {
        if let Some(src_column) = src.layout.column_of(ty.id) {
            dst_chunk
                .column_mut(dst_column)
                .row_mut(dst_row)
                .copy_from_slice(src_chunk.column(src_column).row(src_row));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archetype::ArchetypeId;
    use crate::bitfield::Bitfield;

    type Pos = [f32; 2];
    type Hp = u32;

    fn buffer(capacity: usize) -> ArchetypeBuffer {
        let bits: Bitfield = [ComponentType::of::<Pos>().id, ComponentType::of::<Hp>().id]
            .into_iter()
            .collect();
        ArchetypeBuffer::new(Archetype::new(ArchetypeId(0), bits), capacity)
    }

    fn fill(buf: &mut ArchetypeBuffer, n: u32) -> Vec<Slot> {
        (0..n)
            .map(|i| {
                let slot = buf.get_slot(i);
                *buf.get_mut::<Hp>(slot).unwrap() = i;
                slot
            })
            .collect()
    }

    #[test]
    fn new_slots_are_zeroed() {
        let mut buf = buffer(4);
        let slot = buf.get_slot(0);
        assert_eq!(buf.get::<Pos>(slot), Some(&[0.0, 0.0]));
        assert_eq!(buf.get::<Hp>(slot), Some(&0));
        assert_eq!(buf.get::<u64>(slot), None);
    }

    #[test]
    fn full_chunk_moves_to_end_and_new_chunk_goes_front() {
        let mut buf = buffer(2);
        let slots = fill(&mut buf, 3);
        assert_eq!(buf.chunk_count(), 2);
        // The first chunk filled up, the new one sits in front of it.
        assert_eq!(buf.chunks()[0].id(), slots[2].chunk);
        assert_eq!(buf.chunks()[1].id(), slots[0].chunk);
        assert!(buf.chunks()[1].is_full());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn returned_slot_is_reused_without_clobbering_live_rows() {
        let mut buf = buffer(4);
        let slots = fill(&mut buf, 3);
        assert!(buf.return_slot(slots[0]));
        assert!(!buf.return_slot(slots[0]), "double return must be rejected");

        let fresh = buf.get_slot(99);
        assert_ne!(fresh, slots[1]);
        assert_ne!(fresh, slots[2]);
        assert_eq!(buf.get::<Hp>(slots[1]), Some(&1));
        assert_eq!(buf.get::<Hp>(slots[2]), Some(&2));
        assert_eq!(buf.get::<Hp>(fresh), Some(&0));
        assert_eq!(buf.chunk_count(), 1);
    }

    #[test]
    fn compact_packs_rows_and_is_idempotent() {
        let mut buf = buffer(8);
        let slots = fill(&mut buf, 6);
        buf.return_slot(slots[1]);
        buf.return_slot(slots[4]);

        let chunk = &mut buf.chunks_mut()[0];
        assert!(chunk.requires_compacting());
        assert!(chunk.compact());
        assert!(!chunk.compact());
        assert_eq!(chunk.component_span::<Hp>().unwrap(), &[0, 2, 3, 5]);
        assert_eq!(chunk.owners().collect::<Vec<_>>(), vec![0, 2, 3, 5]);

        // Keys survive the move.
        assert_eq!(buf.get::<Hp>(slots[5]), Some(&5));
        assert_eq!(buf.chunks()[0].row_of(slots[5].key), 3);
    }

    #[test]
    fn compact_zeroes_the_tail() {
        let mut buf = buffer(4);
        let slots = fill(&mut buf, 4);
        buf.return_slot(slots[3]);
        let hp = buf.layout().column_of(ComponentType::of::<Hp>().id).unwrap();
        let chunk = &mut buf.chunks_mut()[0];
        chunk.compact();
        assert_eq!(chunk.column(hp).typed::<Hp>(4), &[0, 1, 2, 0]);
    }

    #[test]
    fn sort_trim_and_consolidate() {
        let mut buf = buffer(4);
        let slots = fill(&mut buf, 10);
        assert_eq!(buf.chunk_count(), 3);
        // Leave 5 live rows spread across all three chunks.
        for slot in [slots[0], slots[1], slots[4], slots[5], slots[8]] {
            buf.return_slot(slot);
        }

        let moved = buf.consolidate();
        assert!(!moved.is_empty());
        assert_eq!(buf.trim(), 1);
        buf.sort_by_used_slots();
        assert_eq!(buf.chunk_count(), 2);
        assert_eq!(buf.len(), 5);

        let mut remaining: Vec<u32> = [2, 3, 6, 7, 9]
            .iter()
            .map(|&i| {
                let slot = moved
                    .iter()
                    .find(|r| r.owner == i)
                    .map_or(slots[i as usize], |r| r.to);
                *buf.get::<Hp>(slot).unwrap()
            })
            .collect();
        remaining.sort();
        assert_eq!(remaining, vec![2, 3, 6, 7, 9]);
        assert!(buf.chunks()[0].used_slots() >= buf.chunks()[1].used_slots());
    }

    #[test]
    fn sort_orders_full_then_partial_then_empty() {
        let mut buf = buffer(2);
        let slots = fill(&mut buf, 5);
        buf.return_slot(slots[2]);
        buf.return_slot(slots[3]);
        buf.sort_by_used_slots();
        let used: Vec<_> = buf.chunks().iter().map(|c| c.used_slots()).collect();
        assert_eq!(used, vec![2, 1, 0]);
    }

    #[test]
    fn sort_orders_partial_chunks_by_decreasing_occupancy() {
        let mut buf = buffer(4);
        let slots = fill(&mut buf, 16);
        // Occupancy by fill order: 4, 1, 3, 0
        for slot in &slots[4..7] {
            buf.return_slot(*slot);
        }
        buf.return_slot(slots[8]);
        for slot in &slots[12..16] {
            buf.return_slot(*slot);
        }
        buf.sort_by_used_slots();
        let used: Vec<_> = buf.chunks().iter().map(|c| c.used_slots()).collect();
        assert_eq!(used, vec![4, 3, 1, 0]);
        assert_eq!(buf.chunk(slots[0].chunk).map(|c| c.used_slots()), Some(4));
    }

    #[test]
    #[should_panic(expected = "column holds")]
    #[cfg(debug_assertions)]
    fn typed_view_rejects_mismatched_type() {
        let mut buf = buffer(2);
        buf.get_slot(0);
        let column = buf.layout().column_of(ComponentType::of::<Hp>().id).unwrap();
        buf.chunks()[0].column(column).typed::<Pos>(1);
    }
}
