//! Data-parallel kernel launching.
//!
//! Every per-ray, per-sample, and per-cell loop in the engine goes through these functions,
//! which use [`rayon`] when the `auto-threads` feature is enabled and plain iteration
//! otherwise. Kernels must not depend on execution order; reductions use [`Sum`]
//! implementations that are associative for the types involved, or are performed
//! afterward in index order by the caller.

use core::iter::Sum;

#[cfg(feature = "auto-threads")]
use rayon::iter::{
    IndexedParallelIterator as _, IntoParallelIterator as _, IntoParallelRefMutIterator as _,
    ParallelIterator as _,
};
#[cfg(feature = "auto-threads")]
use rayon::slice::ParallelSliceMut as _;

/// Computes `f(i)` for every `i` in `0..n` and collects the results in index order.
#[cfg(feature = "auto-threads")]
pub(crate) fn map_collect<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    (0..n).into_par_iter().map(f).collect()
}
#[cfg(not(feature = "auto-threads"))]
pub(crate) fn map_collect<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    (0..n).map(f).collect()
}

/// Calls `f` on every element of `items` with its index.
#[cfg(feature = "auto-threads")]
pub(crate) fn for_each_mut<S, F>(items: &mut [S], f: F)
where
    S: Send,
    F: Fn(usize, &mut S) + Sync + Send,
{
    items
        .par_iter_mut()
        .enumerate()
        .for_each(|(i, item)| f(i, item));
}
#[cfg(not(feature = "auto-threads"))]
pub(crate) fn for_each_mut<S, F>(items: &mut [S], f: F)
where
    S: Send,
    F: Fn(usize, &mut S) + Sync + Send,
{
    for (i, item) in items.iter_mut().enumerate() {
        f(i, item);
    }
}

/// Calls `f` on every element of `items` with its index, and sums the results.
#[cfg(feature = "auto-threads")]
pub(crate) fn map_sum_mut<S, R, F>(items: &mut [S], f: F) -> R
where
    S: Send,
    R: Sum + Send,
    F: Fn(usize, &mut S) -> R + Sync + Send,
{
    items
        .par_iter_mut()
        .enumerate()
        .map(|(i, item)| f(i, item))
        .sum()
}
#[cfg(not(feature = "auto-threads"))]
pub(crate) fn map_sum_mut<S, R, F>(items: &mut [S], f: F) -> R
where
    S: Send,
    R: Sum + Send,
    F: Fn(usize, &mut S) -> R + Sync + Send,
{
    items
        .iter_mut()
        .enumerate()
        .map(|(i, item)| f(i, item))
        .sum()
}

/// Calls `f` on every element of `items` together with the corresponding `chunk_len`-sized
/// chunk of `chunks`, and sums the results.
///
/// Panics if `chunks.len() != items.len() * chunk_len`.
#[cfg(feature = "auto-threads")]
pub(crate) fn map_sum_chunks<S, T, R, F>(items: &mut [S], chunks: &mut [T], chunk_len: usize, f: F) -> R
where
    S: Send,
    T: Send,
    R: Sum + Send,
    F: Fn(usize, &mut S, &mut [T]) -> R + Sync + Send,
{
    assert_eq!(chunks.len(), items.len() * chunk_len);
    if chunk_len == 0 {
        return items.par_iter_mut().enumerate().map(|(i, item)| f(i, item, &mut [])).sum();
    }
    items
        .par_iter_mut()
        .zip(chunks.par_chunks_mut(chunk_len))
        .enumerate()
        .map(|(i, (item, chunk))| f(i, item, chunk))
        .sum()
}
#[cfg(not(feature = "auto-threads"))]
pub(crate) fn map_sum_chunks<S, T, R, F>(items: &mut [S], chunks: &mut [T], chunk_len: usize, f: F) -> R
where
    S: Send,
    T: Send,
    R: Sum + Send,
    F: Fn(usize, &mut S, &mut [T]) -> R + Sync + Send,
{
    assert_eq!(chunks.len(), items.len() * chunk_len);
    if chunk_len == 0 {
        return items.iter_mut().enumerate().map(|(i, item)| f(i, item, &mut [])).sum();
    }
    items
        .iter_mut()
        .zip(chunks.chunks_mut(chunk_len))
        .enumerate()
        .map(|(i, (item, chunk))| f(i, item, chunk))
        .sum()
}

/// Calls `f` on every element of `items` with its own slice from `chunks`
/// (variable-length, as produced by [`split_lengths_mut`]), collecting results in order.
#[cfg(feature = "auto-threads")]
pub(crate) fn zip_map_collect<A, T, R, F>(items: &[A], chunks: Vec<&mut [T]>, f: F) -> Vec<R>
where
    A: Sync,
    T: Send,
    R: Send,
    F: Fn(usize, &A, &mut [T]) -> R + Sync + Send,
{
    use rayon::iter::IntoParallelRefIterator as _;
    assert_eq!(items.len(), chunks.len());
    items
        .par_iter()
        .zip(chunks.into_par_iter())
        .enumerate()
        .map(|(i, (item, chunk))| f(i, item, chunk))
        .collect()
}
#[cfg(not(feature = "auto-threads"))]
pub(crate) fn zip_map_collect<A, T, R, F>(items: &[A], chunks: Vec<&mut [T]>, f: F) -> Vec<R>
where
    A: Sync,
    T: Send,
    R: Send,
    F: Fn(usize, &A, &mut [T]) -> R + Sync + Send,
{
    assert_eq!(items.len(), chunks.len());
    items
        .iter()
        .zip(chunks)
        .enumerate()
        .map(|(i, (item, chunk))| f(i, item, chunk))
        .collect()
}

/// Splits `buffer` into consecutive slices of the given lengths.
///
/// Panics if the lengths add up to more than `buffer.len()`; any remainder is not returned.
pub(crate) fn split_lengths_mut<'a, T>(
    mut buffer: &'a mut [T],
    lengths: impl IntoIterator<Item = usize>,
) -> Vec<&'a mut [T]> {
    let lengths = lengths.into_iter();
    let mut chunks = Vec::with_capacity(lengths.size_hint().0);
    for len in lengths {
        let (chunk, rest) = core::mem::take(&mut buffer).split_at_mut(len);
        chunks.push(chunk);
        buffer = rest;
    }
    chunks
}
