use std::collections::BTreeSet;
use std::ops::Range;

/// Index of a block within the shared file, in `[0, total_blocks)`.
pub type BlockId = u32;

/// Every block id of a file split into `total_blocks` blocks.
pub fn universe(total_blocks: u32) -> BTreeSet<BlockId> {
    (0..total_blocks).collect()
}

/// Number of blocks needed to cover `file_length` bytes.
pub fn compute_block_count(file_length: u64, block_size: usize) -> u32 {
    file_length.div_ceil(block_size as u64) as u32
}

/// Byte range of block `id` inside a file of `file_length` bytes. The last
/// block may be short; ids past the end yield an empty range.
pub fn block_range(id: BlockId, block_size: usize, file_length: u64) -> Range<u64> {
    let start = (id as u64 * block_size as u64).min(file_length);
    let end = (start + block_size as u64).min(file_length);
    start..end
}
