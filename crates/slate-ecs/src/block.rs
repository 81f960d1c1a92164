//! Fixed-size memory blocks with Struct-of-Arrays column layout.
//!
//! Each block is one 16 KiB buffer holding the entity column followed by
//! one column per component type, every column packed at its own
//! alignment. All blocks of an archetype share a single [`BlockLayout`],
//! so typed access is plain pointer arithmetic: column base + row × stride.

use std::{
    alloc::{self, Layout},
    ptr::NonNull,
    sync::Arc,
};

use smallvec::SmallVec;

use crate::{
    component::{Bundle, Component, ComponentId, ComponentMetaSet, TypeMeta},
    entity::Entity,
    error::{EcsError, EcsResult},
    sparse::SparseMap,
};

/// Size of one memory block in bytes.
pub const BLOCK_SIZE: usize = 16 * 1024;

/// Placement of one component column inside a block.
#[derive(Clone, Debug)]
pub(crate) struct ColumnMeta {
    /// Byte offset of the column start from the buffer base.
    offset: usize,
    /// Width of one value; rows stride by this.
    stride: usize,
    /// Type metadata, for destruction and debug type checks.
    meta: TypeMeta,
}

impl ColumnMeta {
    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    pub(crate) fn stride(&self) -> usize {
        self.stride
    }

    pub(crate) fn meta(&self) -> &TypeMeta {
        &self.meta
    }
}

/// Column layout shared by every block of one archetype.
///
/// Computed once at archetype construction: the entity column sits at
/// offset 0, component columns follow in meta-set insertion order, each
/// rounded up to its own alignment.
pub(crate) struct BlockLayout {
    /// Column placements keyed by component id index, in insertion order.
    columns: SparseMap<ColumnMeta>,
    /// Entries one block can hold.
    capacity: usize,
    /// Buffer alignment: the largest column alignment.
    buffer_align: usize,
}

impl BlockLayout {
    /// Compute the layout for a component set.
    ///
    /// Capacity is derived from the aligned footprint of a single entry:
    /// whatever block space the footprint leaves over is divided by the
    /// packed (padding-free) entry size, plus the one entry the footprint
    /// already paid for. Fails when even a single entry does not fit.
    pub(crate) fn new(components: &ComponentMetaSet) -> EcsResult<Self> {
        let mut footprint = size_of::<Entity>();
        let mut packed = size_of::<Entity>();
        let mut buffer_align = align_of::<Entity>();

        for entry in components.iter() {
            let layout = entry.meta.layout();
            footprint = align_up(footprint, layout.align()) + layout.size();
            packed += layout.size();
            buffer_align = buffer_align.max(layout.align());
        }

        if footprint > BLOCK_SIZE {
            return Err(EcsError::LayoutOverflow {
                needed: footprint,
                available: BLOCK_SIZE,
            });
        }

        let mut capacity = (BLOCK_SIZE - footprint) / packed + 1;

        // Inter-column padding at full capacity can exceed the padding of
        // the single-entry walk; shrink until the last column fits.
        while Self::span(components, capacity) > BLOCK_SIZE {
            capacity -= 1;
        }

        let mut columns = SparseMap::new();
        let mut offset = size_of::<Entity>() * capacity;
        for entry in components.iter() {
            let layout = entry.meta.layout();
            offset = align_up(offset, layout.align());
            columns.insert(
                entry.id.index() as u32,
                ColumnMeta {
                    offset,
                    stride: layout.size(),
                    meta: entry.meta,
                },
            );
            offset += layout.size() * capacity;
        }

        Ok(Self {
            columns,
            capacity,
            buffer_align,
        })
    }

    /// Entries one block of this layout can hold.
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Column placement for a component id.
    pub(crate) fn column(&self, id: ComponentId) -> Option<&ColumnMeta> {
        self.columns.get(id.index() as u32)
    }

    /// Iterate over column placements in insertion order.
    pub(crate) fn columns(&self) -> impl Iterator<Item = &ColumnMeta> {
        self.columns.iter().map(|(_, column)| column)
    }

    /// Byte span of the full layout at `capacity` entries per column.
    fn span(components: &ComponentMetaSet, capacity: usize) -> usize {
        let mut end = size_of::<Entity>() * capacity;
        for entry in components.iter() {
            let layout = entry.meta.layout();
            end = align_up(end, layout.align()) + layout.size() * capacity;
        }
        end
    }

    fn buffer_layout(&self) -> Layout {
        Layout::from_size_align(BLOCK_SIZE, self.buffer_align)
            .expect("block size and column alignment form a valid layout")
    }
}

const fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

/// A fixed-capacity 16 KiB buffer storing entities and their components
/// in packed parallel columns.
///
/// Move-only: blocks own their buffer and run every live entry's
/// destructors on drop.
pub struct MemBlock {
    /// Pointer to the buffer.
    data: NonNull<u8>,
    /// Number of live entries.
    len: usize,
    /// Shared column layout of the owning archetype.
    layout: Arc<BlockLayout>,
}

// SAFETY: the block owns its buffer exclusively and every stored
// component type is Send + Sync by the Component bound.
unsafe impl Send for MemBlock {}
unsafe impl Sync for MemBlock {}

impl MemBlock {
    /// Allocate an empty block for the given layout.
    pub(crate) fn new(layout: Arc<BlockLayout>) -> Self {
        let buffer_layout = layout.buffer_layout();

        // SAFETY: the layout has non-zero size and power-of-two alignment.
        let data = unsafe {
            let ptr = alloc::alloc(buffer_layout);
            if ptr.is_null() {
                alloc::handle_alloc_error(buffer_layout);
            }
            NonNull::new_unchecked(ptr)
        };

        Self {
            data,
            len: 0,
            layout,
        }
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the block holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Check if the block is at capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len == self.layout.capacity()
    }

    /// Entries this block can hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.layout.capacity()
    }

    /// Entity stored at `row`.
    ///
    /// The entity column is read-only; no mutable access to it exists.
    #[must_use]
    pub fn entity(&self, row: usize) -> Entity {
        debug_assert!(row < self.len, "row out of bounds in MemBlock::entity");
        // SAFETY: the entity column starts at offset 0 and `row` is live.
        unsafe { *self.entity_ptr(row) }
    }

    /// Reference to the `T` component at `row`.
    ///
    /// Returns `None` when the layout has no column for `id`.
    #[must_use]
    pub fn get<T: Component>(&self, id: ComponentId, row: usize) -> Option<&T> {
        let column = self.layout.column(id)?;
        debug_assert!(column.meta().is::<T>(), "type mismatch in MemBlock::get");
        debug_assert!(row < self.len, "row out of bounds in MemBlock::get");

        // SAFETY: the column offset is aligned for T and `row` is live.
        Some(unsafe { &*self.row_ptr(column, row).cast::<T>() })
    }

    /// Mutable reference to the `T` component at `row`.
    ///
    /// Returns `None` when the layout has no column for `id`.
    #[must_use]
    pub fn get_mut<T: Component>(&mut self, id: ComponentId, row: usize) -> Option<&mut T> {
        let column = self.layout.column(id)?;
        debug_assert!(column.meta().is::<T>(), "type mismatch in MemBlock::get_mut");
        debug_assert!(row < self.len, "row out of bounds in MemBlock::get_mut");

        // SAFETY: the column offset is aligned for T, `row` is live, and
        // &mut self rules out other references.
        Some(unsafe { &mut *self.row_ptr(column, row).cast::<T>() })
    }

    /// Base pointer of the column for `id`, for strided row access.
    pub(crate) fn column_ptr(&self, id: ComponentId) -> Option<*mut u8> {
        let column = self.layout.column(id)?;
        // SAFETY: every column offset lies inside the buffer.
        Some(unsafe { self.data.as_ptr().add(column.offset()) })
    }

    /// Append an entity and its component bundle at the next free row.
    ///
    /// `ids` are the bundle's component ids in tuple order.
    pub(crate) fn push<B: Bundle>(&mut self, entity: Entity, bundle: B, ids: &[ComponentId]) -> usize {
        debug_assert!(!self.is_full(), "memory block is full");

        let row = self.len;

        // SAFETY: row < capacity; the entity column starts at offset 0.
        unsafe { std::ptr::write(self.entity_ptr(row), entity) };

        let mut destinations: SmallVec<[*mut u8; 8]> = SmallVec::with_capacity(ids.len());
        for &id in ids {
            let column = self
                .layout
                .column(id)
                .expect("bundle component missing from block layout");
            destinations.push(self.row_ptr(column, row));
        }

        // SAFETY: one aligned destination per component, in tuple order.
        unsafe { bundle.write(&destinations) };

        self.len += 1;
        row
    }

    /// Erase `row`, filling the gap from this block's own last entry.
    ///
    /// Returns the entity moved into the gap, or `None` when `row` was the
    /// last entry and nothing had to move.
    pub(crate) fn erase_within(&mut self, row: usize) -> Option<Entity> {
        debug_assert!(row < self.len, "row out of bounds in erase_within");

        let last = self.len - 1;
        if row == last {
            // SAFETY: `last` is live.
            unsafe { self.drop_row(last) };
            self.len -= 1;
            return None;
        }

        let moved = self.entity(last);
        let layout = Arc::clone(&self.layout);

        // SAFETY: `row` and `last` are live and distinct; the destination
        // value is dropped before the source is relocated over it.
        unsafe {
            std::ptr::write(self.entity_ptr(row), moved);
            for column in layout.columns() {
                let stride = column.stride();
                let base = self.data.as_ptr().add(column.offset());
                let dst = base.add(row * stride);
                column.meta().drop_values(dst, 1);
                std::ptr::copy_nonoverlapping(base.add(last * stride), dst, stride);
            }
        }

        // The last row's values were relocated, not dropped.
        self.len -= 1;
        Some(moved)
    }

    /// Erase `row`, filling the gap from another block's last entry.
    ///
    /// Returns the moved entity. `tail` must be a non-empty block sharing
    /// this block's layout.
    pub(crate) fn erase_and_fill_from(&mut self, row: usize, tail: &mut MemBlock) -> Entity {
        debug_assert!(row < self.len, "row out of bounds in erase_and_fill_from");
        debug_assert!(!tail.is_empty(), "tail block is empty, cannot move entity");

        let src_row = tail.len - 1;
        let moved = tail.entity(src_row);
        let layout = Arc::clone(&self.layout);

        // SAFETY: both rows are live, the blocks are distinct, and the
        // destination value is dropped before the source is relocated.
        unsafe {
            std::ptr::write(self.entity_ptr(row), moved);
            for column in layout.columns() {
                let stride = column.stride();
                let dst = self.data.as_ptr().add(column.offset() + row * stride);
                column.meta().drop_values(dst, 1);
                std::ptr::copy_nonoverlapping(
                    tail.data.as_ptr().add(column.offset() + src_row * stride),
                    dst,
                    stride,
                );
            }
        }

        // The tail row's values were relocated, not dropped.
        tail.len -= 1;
        moved
    }

    fn entity_ptr(&self, row: usize) -> *mut Entity {
        debug_assert!(row < self.layout.capacity());
        // SAFETY: the entity column spans capacity entries from offset 0.
        unsafe { self.data.as_ptr().cast::<Entity>().add(row) }
    }

    fn row_ptr(&self, column: &ColumnMeta, row: usize) -> *mut u8 {
        debug_assert!(row < self.layout.capacity());
        // SAFETY: the column spans capacity entries from its offset.
        unsafe { self.data.as_ptr().add(column.offset() + row * column.stride()) }
    }

    /// Run every column destructor for the entry at `row`.
    ///
    /// # Safety
    ///
    /// `row` must hold live values, and they must not be used afterwards.
    unsafe fn drop_row(&mut self, row: usize) {
        let layout = Arc::clone(&self.layout);
        for column in layout.columns() {
            // SAFETY: caller guarantees a live value at `row`.
            unsafe { column.meta().drop_values(self.row_ptr(column, row), 1) };
        }
        // The entity column is plain data; nothing to run.
    }

    /// Strided read-only pass over the entity column.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        (0..self.len).map(|row| self.entity(row))
    }
}

impl Drop for MemBlock {
    fn drop(&mut self) {
        // Column rows are contiguous, so each column drops as one slab.
        let layout = Arc::clone(&self.layout);
        for column in layout.columns() {
            // SAFETY: rows below len hold live values laid out back to back.
            unsafe {
                column
                    .meta()
                    .drop_values(self.data.as_ptr().add(column.offset()), self.len);
            }
        }

        // SAFETY: the buffer was allocated with this layout in `new`.
        unsafe { alloc::dealloc(self.data.as_ptr(), self.layout.buffer_layout()) };
    }
}

impl std::fmt::Debug for MemBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemBlock")
            .field("len", &self.len)
            .field("capacity", &self.layout.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentRegistry;

    fn meta_set_of<B: Bundle>(registry: &mut ComponentRegistry) -> ComponentMetaSet {
        B::metas(registry).unwrap()
    }

    #[test]
    fn test_capacity_packs_block_exactly() {
        let mut registry = ComponentRegistry::new();
        let metas = meta_set_of::<(u64,)>(&mut registry);
        let layout = BlockLayout::new(&metas).unwrap();

        // Entity (8 bytes) + u64 (8 bytes) per entry, no padding.
        assert_eq!(layout.capacity(), BLOCK_SIZE / 16);
    }

    #[test]
    fn test_single_entry_overflow() {
        let mut registry = ComponentRegistry::new();
        let metas = meta_set_of::<([u8; 2 * BLOCK_SIZE],)>(&mut registry);

        assert!(matches!(
            BlockLayout::new(&metas),
            Err(EcsError::LayoutOverflow { .. })
        ));
    }

    #[test]
    fn test_columns_are_aligned() {
        struct Wide(#[allow(dead_code)] u128);

        let mut registry = ComponentRegistry::new();
        let metas = meta_set_of::<(u8, Wide, u32)>(&mut registry);
        let layout = BlockLayout::new(&metas).unwrap();

        assert!(layout.capacity() >= 1);
        for column in layout.columns() {
            assert_eq!(column.offset() % column.meta().layout().align(), 0);
        }

        // Every column stays inside the buffer at full capacity.
        let end = layout
            .columns()
            .map(|c| c.offset() + c.stride() * layout.capacity())
            .max()
            .unwrap();
        assert!(end <= BLOCK_SIZE);
    }

    #[test]
    fn test_push_get_erase() {
        let mut registry = ComponentRegistry::new();
        let metas = meta_set_of::<(u64, i32)>(&mut registry);
        let ids = <(u64, i32)>::component_ids(&mut registry);
        let layout = Arc::new(BlockLayout::new(&metas).unwrap());
        let mut block = MemBlock::new(layout);

        for n in 0..4u64 {
            let row = block.push(Entity::new(n as u32, 0), (n * 10, -(n as i32)), &ids);
            assert_eq!(row, n as usize);
        }
        assert_eq!(block.len(), 4);
        assert_eq!(block.get::<u64>(ids[0], 2), Some(&20));
        assert_eq!(block.get::<i32>(ids[1], 3), Some(&-3));
        assert_eq!(block.entity(1), Entity::new(1, 0));

        // Erasing an interior row pulls the last entry into the gap.
        let moved = block.erase_within(1);
        assert_eq!(moved, Some(Entity::new(3, 0)));
        assert_eq!(block.len(), 3);
        assert_eq!(block.get::<u64>(ids[0], 1), Some(&30));

        // Erasing the last row moves nothing.
        assert_eq!(block.erase_within(2), None);
        assert_eq!(block.len(), 2);
    }

    #[test]
    fn test_unknown_column_is_none() {
        let mut registry = ComponentRegistry::new();
        let metas = meta_set_of::<(u64,)>(&mut registry);
        let ids = <(u64,)>::component_ids(&mut registry);
        let stranger = registry.id_of::<i32>();

        let layout = Arc::new(BlockLayout::new(&metas).unwrap());
        let mut block = MemBlock::new(layout);
        block.push(Entity::new(0, 0), (1u64,), &ids);

        assert!(block.get::<i32>(stranger, 0).is_none());
        assert!(block.column_ptr(stranger).is_none());
    }

    #[test]
    fn test_drop_runs_for_live_entries() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        static DROP_COUNT: AtomicUsize = AtomicUsize::new(0);

        struct DropCounter;

        impl Drop for DropCounter {
            fn drop(&mut self) {
                DROP_COUNT.fetch_add(1, Ordering::SeqCst);
            }
        }

        DROP_COUNT.store(0, Ordering::SeqCst);

        let mut registry = ComponentRegistry::new();
        let metas = meta_set_of::<(DropCounter,)>(&mut registry);
        let ids = <(DropCounter,)>::component_ids(&mut registry);
        let layout = Arc::new(BlockLayout::new(&metas).unwrap());

        {
            let mut block = MemBlock::new(layout);
            for n in 0..3 {
                block.push(Entity::new(n, 0), (DropCounter,), &ids);
            }
            assert_eq!(DROP_COUNT.load(Ordering::SeqCst), 0);

            // One value dropped in place, one relocated (not dropped).
            block.erase_within(0);
            assert_eq!(DROP_COUNT.load(Ordering::SeqCst), 1);
        }

        assert_eq!(DROP_COUNT.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_cross_block_fill() {
        let mut registry = ComponentRegistry::new();
        let metas = meta_set_of::<(u64,)>(&mut registry);
        let ids = <(u64,)>::component_ids(&mut registry);
        let layout = Arc::new(BlockLayout::new(&metas).unwrap());

        let mut first = MemBlock::new(Arc::clone(&layout));
        let mut tail = MemBlock::new(layout);

        first.push(Entity::new(0, 0), (100u64,), &ids);
        first.push(Entity::new(1, 0), (101u64,), &ids);
        tail.push(Entity::new(2, 0), (200u64,), &ids);

        let moved = first.erase_and_fill_from(0, &mut tail);
        assert_eq!(moved, Entity::new(2, 0));
        assert_eq!(first.len(), 2);
        assert!(tail.is_empty());
        assert_eq!(first.get::<u64>(ids[0], 0), Some(&200));
        assert_eq!(first.get::<u64>(ids[0], 1), Some(&101));
    }
}
