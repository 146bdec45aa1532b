use crate::config::StealOrder;
use crate::page_alloc::{AllocFlags, OwnedPage};
use crate::test_fixtures::{TestPool, assert_conserved, config, interrupts_enabled, pin_to_cpu};

fn exhaust_and_check(order: StealOrder) {
    let pool = TestPool::new(16, config(4).with_steal_order(order), 0);
    pin_to_cpu(2);
    let held = pool.drain();
    assert_eq!(held.len(), 16);

    for cpu in 0..4 {
        pin_to_cpu(cpu);
        assert_eq!(pool.allocator.alloc_page(), None);
        assert_eq!(pool.allocator.alloc_page_with(AllocFlags::ZERO), None);
        assert!(interrupts_enabled());
    }
    assert_eq!(pool.free_counts(), vec![0, 0, 0, 0]);
    assert_eq!(pool.allocator.stats().allocated, 16);
    // Failed allocations are not counted.
    assert_eq!(pool.allocator.cpu_stats(2).allocs, 16);
    assert_conserved(&pool, &held);
}

#[test]
fn exhaustion_returns_none_on_every_cpu() {
    exhaust_and_check(StealOrder::Ascending);
}

#[test]
fn exhaustion_returns_none_with_owner_first_order() {
    exhaust_and_check(StealOrder::OwnerFirst);
}

#[test]
fn pool_recovers_after_exhaustion() {
    let pool = TestPool::new(8, config(2), 0);
    let held = pool.drain();
    assert_eq!(pool.allocator.alloc_page(), None);

    pin_to_cpu(1);
    for page in &held[..3] {
        pool.allocator.free_page(*page);
    }

    pin_to_cpu(0);
    let again = pool.allocator.alloc_page().expect("page freed on cpu 1");
    assert!(held[..3].contains(&again));
    assert_eq!(pool.free_counts(), vec![2, 0]);

    pool.allocator.free_page(again);
    for page in &held[3..] {
        pool.allocator.free_page(*page);
    }
    assert_eq!(pool.allocator.stats().free, 8);
    assert_conserved(&pool, &[]);
}

#[test]
fn owned_page_alloc_fails_cleanly_when_exhausted() {
    let pool = TestPool::new(1, config(1), 0);
    let page = OwnedPage::alloc_zeroed(pool.allocator).expect("only page");
    assert!(OwnedPage::alloc(pool.allocator, AllocFlags::empty()).is_none());
    drop(page);
    assert!(OwnedPage::alloc_zeroed(pool.allocator).is_some());
}
