use std::num::Wrapping;

/// Rounds `ix` up to the next multiple of `alignment`.
pub(crate) fn align(ix: usize, alignment: usize) -> usize {
    debug_assert!(
        alignment.is_power_of_two(),
        "{} is not power of 2, cannot be used as alignment",
        alignment
    );
    let mask = Wrapping(alignment) - Wrapping(1);
    let old_size = Wrapping(ix);
    let new_size = old_size + ((-old_size) & mask);
    debug_assert!(
        new_size >= old_size,
        "align function broke: {} < {}",
        new_size,
        old_size
    );
    new_size.0
}

/// Number of padding bytes needed to bring `ix` to `alignment`.
pub(crate) fn padding(ix: usize, alignment: usize) -> usize {
    align(ix, alignment) - ix
}

pub(crate) fn pad_vec(vec: &mut Vec<u8>, alignment: usize) {
    vec.resize(align(vec.len(), alignment), 0);
}
