use ash::vk;

/// A byte range within a pool's buffer, either free or in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Suballocation {
    /// Byte offset of the block within the pool's buffer.
    pub offset: vk::DeviceSize,

    /// Length of the block in bytes.
    pub size: vk::DeviceSize,

    /// If the block is available for allocation.
    pub is_free: bool,
}

impl Suballocation {
    #[inline]
    fn end(&self) -> vk::DeviceSize {
        self.offset + self.size
    }
}

/// A free block that can hold a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fit {
    /// Index of the free block in the block list.
    pub index: usize,

    /// The aligned offset the allocation would start at.
    pub offset: vk::DeviceSize,

    /// The size of the whole free block.
    pub block_size: vk::DeviceSize,
}

/// The blocks of a single pool, ordered by offset.
///
/// The blocks always partition `0..size` with no gaps and no overlaps.
#[derive(Debug, Clone)]
pub struct BlockList {
    size: vk::DeviceSize,
    blocks: Vec<Suballocation>,
}

impl BlockList {
    /// Creates a block list with a single free block spanning `size` bytes.
    pub fn new(size: vk::DeviceSize) -> Self {
        Self {
            size,
            blocks: vec![Suballocation {
                offset: 0,
                size,
                is_free: true,
            }],
        }
    }

    /// The total size covered by the blocks.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// The blocks in list order.
    #[inline]
    pub fn blocks(&self) -> &[Suballocation] {
        &self.blocks
    }

    /// Finds the smallest free block that can hold `size` bytes starting at an offset aligned to
    /// `alignment`. Ties go to the first block found.
    pub fn best_fit(&self, size: vk::DeviceSize, alignment: vk::DeviceSize) -> Option<Fit> {
        let mut best: Option<Fit> = None;

        for (index, block) in self.blocks.iter().enumerate() {
            if !block.is_free || block.size < size {
                continue;
            }

            let Some(offset) = block.offset.checked_next_multiple_of(alignment) else {
                continue;
            };

            let fits = offset
                .checked_add(size)
                .is_some_and(|end| end <= block.end());
            if !fits {
                continue;
            }

            if best.is_none_or(|best| block.size < best.block_size) {
                best = Some(Fit {
                    index,
                    offset,
                    block_size: block.size,
                });
            }
        }

        best
    }

    /// Marks `size` bytes starting at `fit.offset` as used, splitting the free block around it.
    ///
    /// Any alignment gap in front of the allocation and any remainder after it stay free.
    pub fn allocate(&mut self, fit: Fit, size: vk::DeviceSize) -> vk::DeviceSize {
        let block = self.blocks[fit.index];
        debug_assert!(block.is_free);
        debug_assert!(fit.offset >= block.offset && fit.offset + size <= block.end());

        let gap = fit.offset - block.offset;
        let remainder = block.end() - (fit.offset + size);

        let mut replacement = Vec::with_capacity(3);
        if gap > 0 {
            replacement.push(Suballocation {
                offset: block.offset,
                size: gap,
                is_free: true,
            });
        }
        replacement.push(Suballocation {
            offset: fit.offset,
            size,
            is_free: false,
        });
        if remainder > 0 {
            replacement.push(Suballocation {
                offset: fit.offset + size,
                size: remainder,
                is_free: true,
            });
        }

        self.blocks.splice(fit.index..=fit.index, replacement);

        fit.offset
    }

    /// Frees the used block starting at exactly `offset` and merges it with free neighbours.
    ///
    /// Returns the size of the freed block, or `None` if no used block starts at `offset`.
    pub fn free(&mut self, offset: vk::DeviceSize) -> Option<vk::DeviceSize> {
        let block = self
            .blocks
            .iter_mut()
            .find(|block| block.offset == offset && !block.is_free)?;

        block.is_free = true;
        let size = block.size;

        self.merge_free();

        Some(size)
    }

    /// Sorts the blocks by offset and merges adjacent free blocks. Used blocks never move.
    pub fn defragment(&mut self) {
        self.blocks.sort_by_key(|block| block.offset);
        self.merge_free();
    }

    /// Merges runs of adjacent free blocks into single blocks.
    fn merge_free(&mut self) {
        let mut merged: Vec<Suballocation> = Vec::with_capacity(self.blocks.len());

        for block in self.blocks.drain(..) {
            match merged.last_mut() {
                Some(last) if last.is_free && block.is_free && last.end() == block.offset => {
                    last.size += block.size;
                }
                _ => merged.push(block),
            }
        }

        self.blocks = merged;
    }

    /// The number of bytes in used blocks.
    pub fn used_bytes(&self) -> vk::DeviceSize {
        self.blocks
            .iter()
            .filter(|block| !block.is_free)
            .map(|block| block.size)
            .sum()
    }

    /// The number of used blocks.
    pub fn used_count(&self) -> usize {
        self.blocks.iter().filter(|block| !block.is_free).count()
    }

    /// If the blocks, sorted by offset, cover `0..size` with no gaps or overlaps.
    pub fn is_partition(&self) -> bool {
        let mut sorted = self.blocks.clone();
        sorted.sort_by_key(|block| block.offset);

        let mut expected_offset = 0;
        for block in &sorted {
            if block.offset != expected_offset || block.size == 0 {
                return false;
            }
            expected_offset = block.end();
        }

        expected_offset == self.size
    }
}

#[cfg(test)]
mod test {
    use rand::{Rng, SeedableRng, rngs::StdRng};

    use super::{BlockList, Suballocation};

    fn used(offset: u64, size: u64) -> Suballocation {
        Suballocation {
            offset,
            size,
            is_free: false,
        }
    }

    fn free(offset: u64, size: u64) -> Suballocation {
        Suballocation {
            offset,
            size,
            is_free: true,
        }
    }

    /// Builds a list with free blocks of 100, 50 and 30 bytes separated by used blocks.
    fn fragmented() -> BlockList {
        let mut blocks = BlockList::new(200);
        let a = blocks.allocate(blocks.best_fit(100, 1).unwrap(), 100);
        let _b = blocks.allocate(blocks.best_fit(10, 1).unwrap(), 10);
        let c = blocks.allocate(blocks.best_fit(50, 1).unwrap(), 50);
        let _d = blocks.allocate(blocks.best_fit(10, 1).unwrap(), 10);
        let e = blocks.allocate(blocks.best_fit(30, 1).unwrap(), 30);

        blocks.free(a).unwrap();
        blocks.free(c).unwrap();
        blocks.free(e).unwrap();

        blocks
    }

    #[test]
    fn new_list_is_single_free_block() {
        let blocks = BlockList::new(1024);

        assert_eq!(blocks.blocks(), &[free(0, 1024)]);
        assert!(blocks.is_partition());
    }

    #[test]
    fn best_fit_picks_smallest_sufficient_block() {
        let blocks = fragmented();
        assert_eq!(
            blocks.blocks(),
            &[
                free(0, 100),
                used(100, 10),
                free(110, 50),
                used(160, 10),
                free(170, 30)
            ]
        );

        let fit = blocks.best_fit(40, 1).unwrap();
        assert_eq!(fit.offset, 110);
        assert_eq!(fit.block_size, 50);

        let fit = blocks.best_fit(30, 1).unwrap();
        assert_eq!(fit.offset, 170);

        assert!(blocks.best_fit(101, 1).is_none());
    }

    #[test]
    fn best_fit_ties_go_to_first_block() {
        let mut blocks = BlockList::new(70);
        let a = blocks.allocate(blocks.best_fit(30, 1).unwrap(), 30);
        let _b = blocks.allocate(blocks.best_fit(10, 1).unwrap(), 10);
        blocks.free(a).unwrap();

        // Two free blocks of 30 bytes.
        assert_eq!(blocks.best_fit(20, 1).unwrap().offset, 0);
    }

    #[test]
    fn exact_fit_marks_whole_block_used() {
        let mut blocks = fragmented();

        let fit = blocks.best_fit(50, 1).unwrap();
        let offset = blocks.allocate(fit, 50);

        assert_eq!(offset, 110);
        assert_eq!(blocks.blocks()[2], used(110, 50));
        assert_eq!(blocks.blocks().len(), 5);
    }

    #[test]
    fn alignment_gap_stays_free() {
        let mut blocks = BlockList::new(256);
        blocks.allocate(blocks.best_fit(3, 1).unwrap(), 3);

        let fit = blocks.best_fit(16, 64).unwrap();
        let offset = blocks.allocate(fit, 16);

        assert_eq!(offset, 64);
        assert_eq!(
            blocks.blocks(),
            &[used(0, 3), free(3, 61), used(64, 16), free(80, 176)]
        );
        assert!(blocks.is_partition());
    }

    #[test]
    fn alignment_can_rule_out_a_block() {
        let mut blocks = BlockList::new(128);
        blocks.allocate(blocks.best_fit(1, 1).unwrap(), 1);

        // 127 bytes are free but only 64 of them start on a 64 byte boundary.
        assert!(blocks.best_fit(100, 64).is_none());
        assert_eq!(blocks.best_fit(64, 64).unwrap().offset, 64);
    }

    #[test]
    fn free_merges_neighbours() {
        let mut blocks = BlockList::new(300);
        let a = blocks.allocate(blocks.best_fit(100, 1).unwrap(), 100);
        let b = blocks.allocate(blocks.best_fit(100, 1).unwrap(), 100);
        let c = blocks.allocate(blocks.best_fit(100, 1).unwrap(), 100);

        assert_eq!(blocks.free(a), Some(100));
        assert_eq!(blocks.free(b), Some(100));

        assert_eq!(blocks.blocks(), &[free(0, 200), used(c, 100)]);
    }

    #[test]
    fn free_of_unknown_offset_changes_nothing() {
        let mut blocks = BlockList::new(300);
        let a = blocks.allocate(blocks.best_fit(100, 1).unwrap(), 100);
        let before = blocks.blocks().to_vec();

        assert_eq!(blocks.free(a + 1), None);
        assert_eq!(blocks.free(200), None);
        assert_eq!(blocks.blocks(), before.as_slice());

        assert_eq!(blocks.free(a), Some(100));
        assert_eq!(blocks.free(a), None);
    }

    #[test]
    fn defragment_keeps_used_offsets() {
        let mut blocks = fragmented();
        let used_before: Vec<_> = blocks
            .blocks()
            .iter()
            .filter(|block| !block.is_free)
            .copied()
            .collect();

        blocks.defragment();

        let used_after: Vec<_> = blocks
            .blocks()
            .iter()
            .filter(|block| !block.is_free)
            .copied()
            .collect();

        assert_eq!(used_before, used_after);
        assert!(blocks.is_partition());
    }

    #[test]
    fn random_operations_keep_partition() {
        let mut rng = StdRng::seed_from_u64(0x7e57);
        let mut blocks = BlockList::new(64 * 1024);
        let mut live: Vec<(u64, u64)> = vec![];

        for _ in 0..2000 {
            if live.is_empty() || rng.random_bool(0.6) {
                let size = rng.random_range(1..2048);
                let alignment: u64 = 1 << rng.random_range(0..8u32);

                if let Some(fit) = blocks.best_fit(size, alignment) {
                    let offset = blocks.allocate(fit, size);
                    assert_eq!(offset % alignment, 0);
                    assert!(
                        live.iter()
                            .all(|&(other, other_size)| offset + size <= other
                                || other + other_size <= offset)
                    );
                    live.push((offset, size));
                }
            } else {
                let index = rng.random_range(0..live.len());
                let (offset, size) = live.swap_remove(index);
                assert_eq!(blocks.free(offset), Some(size));
            }

            if rng.random_bool(0.05) {
                blocks.defragment();
            }

            assert!(blocks.is_partition());
            assert_eq!(blocks.used_count(), live.len());
            assert_eq!(
                blocks.used_bytes(),
                live.iter().map(|(_, size)| size).sum::<u64>()
            );
        }
    }
}
