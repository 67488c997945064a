#![feature(test)]
extern crate test;
use test::Bencher;

use segalloc::{ExplicitAllocator, ImplicitAllocator, SegmentAllocator};

const HEAP_SIZE: usize = 8192;

/// Run a benchmark which repeatedly allocates and deallocates a single
/// small block, after first filling the heap with `pre_allocations`
/// unrelated 8-byte blocks to see the real impact of a linear scan.
///
/// # Panics
/// Panics if the requested pre-allocations fill the whole heap, leaving no
/// room for the benchmark's own allocation.
fn benchmark_implicit(b: &mut Bencher, pre_allocations: usize) {
    let mut buf = vec![0u8; HEAP_SIZE];
    let mut allocator = ImplicitAllocator::new();
    assert!(unsafe { allocator.init(buf.as_mut_ptr(), HEAP_SIZE) });

    for _ in 0..pre_allocations {
        allocator.malloc(8).expect("benchmark heap exhausted by preallocation");
    }

    let ptr = allocator.malloc(8).expect("no room left for the benchmarked allocation");
    unsafe { allocator.free(ptr) };

    b.iter(|| {
        let ptr = allocator.malloc(8);
        let ptr = test::black_box(ptr).unwrap();
        unsafe { allocator.free(ptr) };
    });
}

fn benchmark_explicit(b: &mut Bencher, pre_allocations: usize) {
    let mut buf = vec![0u8; HEAP_SIZE];
    let mut allocator = ExplicitAllocator::new();
    assert!(unsafe { allocator.init(buf.as_mut_ptr(), HEAP_SIZE) });

    for _ in 0..pre_allocations {
        allocator.malloc(8).expect("benchmark heap exhausted by preallocation");
    }

    let ptr = allocator.malloc(8).expect("no room left for the benchmarked allocation");
    unsafe { allocator.free(ptr) };

    b.iter(|| {
        let ptr = allocator.malloc(8);
        let ptr = test::black_box(ptr).unwrap();
        unsafe { allocator.free(ptr) };
    });
}

mod implicit {
    use super::*;

    #[bench]
    fn no_memory_usage(b: &mut Bencher) {
        benchmark_implicit(b, 0);
    }

    #[bench]
    fn low_memory_usage(b: &mut Bencher) {
        benchmark_implicit(b, 8);
    }

    #[bench]
    fn medium_memory_usage(b: &mut Bencher) {
        benchmark_implicit(b, 250);
    }

    #[bench]
    fn high_memory_usage(b: &mut Bencher) {
        benchmark_implicit(b, 500);
    }
}

mod explicit {
    use super::*;

    #[bench]
    fn no_memory_usage(b: &mut Bencher) {
        benchmark_explicit(b, 0);
    }

    #[bench]
    fn low_memory_usage(b: &mut Bencher) {
        benchmark_explicit(b, 8);
    }

    #[bench]
    fn medium_memory_usage(b: &mut Bencher) {
        benchmark_explicit(b, 250);
    }

    #[bench]
    fn high_memory_usage(b: &mut Bencher) {
        benchmark_explicit(b, 500);
    }
}
