// Copyright @yucwang 2026

//! Helper kernels linked into every module that asks for the runtime
//! library.

use crate::device::{KernelContext, KernelFragment, KernelLibrary};
use crate::math::constants::{Float, Vector2f};
use crate::math::warp::sample_cosine_hemisphere;

pub const RANDOM_FRAGMENT: &str = "runtime/Random.kernel";
pub const WARP_FRAGMENT: &str = "runtime/Warp.kernel";
pub const RUNTIME_FRAGMENTS: [&str; 2] = [RANDOM_FRAGMENT, WARP_FRAGMENT];

pub const PCG_HASH: &str = "rt_pcg_hash";
pub const COSINE_HEMISPHERE: &str = "rt_cosine_hemisphere";

pub fn pcg_hash(input: u32) -> u32 {
    let state = input.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    let word = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277_803_737);
    (word >> 22) ^ word
}

/// `[u32 in, u32 out]`
fn rt_pcg_hash(ctx: &mut KernelContext<'_>, args: &mut [u8]) {
    let [input, _]: [u32; 2] = ctx.load(args);
    ctx.store(args, &[input, pcg_hash(input)]);
}

/// `[u1, u2]` in, local direction `[x, y, z]` out.
fn rt_cosine_hemisphere(ctx: &mut KernelContext<'_>, args: &mut [u8]) {
    let [u1, u2]: [Float; 2] = ctx.load(args);
    let w = sample_cosine_hemisphere(&Vector2f::new(u1, u2));
    ctx.store(args, &[w.x, w.y, w.z]);
}

pub fn install(library: &mut KernelLibrary) {
    library.install(KernelFragment::new(RANDOM_FRAGMENT).export(PCG_HASH, rt_pcg_hash, 16));
    library.install(KernelFragment::new(WARP_FRAGMENT).export(COSINE_HEMISPHERE, rt_cosine_hemisphere, 32));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcg_hash_spreads_neighbours() {
        let a = pcg_hash(0);
        let b = pcg_hash(1);
        assert_ne!(a, b);
        assert_eq!(pcg_hash(7), pcg_hash(7));
    }
}
