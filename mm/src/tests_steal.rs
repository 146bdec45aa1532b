use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use kmem_abi::PhysAddr;

use crate::config::StealOrder;
use crate::mm_constants::STEAL_BATCH_PAGES;
use crate::test_fixtures::{TestPool, assert_conserved, config, pin_to_cpu};

fn pages_desc(pool: &TestPool, range: std::ops::Range<u32>) -> Vec<PhysAddr> {
    range.rev().map(|i| pool.layout.page_addr(i)).collect()
}

#[test]
fn steal_takes_one_batch_from_the_front_of_the_donor() {
    let pool = TestPool::new(2000, config(2), 1);
    pin_to_cpu(0);

    // Bootstrap pushed pages in index order, so the donor's head is 1999.
    let page = pool.allocator.alloc_page().expect("stolen page");
    assert_eq!(page, pool.layout.page_addr(1999));

    assert_eq!(pool.free_counts(), vec![STEAL_BATCH_PAGES - 1, 2000 - 1024]);
    assert_eq!(pool.free_list(0), pages_desc(&pool, 976..1999));
    assert_eq!(pool.free_list(1), pages_desc(&pool, 0..976));

    let stats = pool.allocator.cpu_stats(0);
    assert_eq!((stats.steals, stats.pages_stolen), (1, 1024));
    assert_conserved(&pool, &[page]);
}

#[test]
fn steal_drains_a_donor_smaller_than_one_batch() {
    let pool = TestPool::new(10, config(2), 0);
    pin_to_cpu(1);
    let page = pool.allocator.alloc_page().expect("stolen page");
    assert_eq!(pool.free_counts(), vec![0, 9]);
    assert_eq!(pool.allocator.cpu_stats(1).pages_stolen, 10);
    assert_conserved(&pool, &[page]);
}

#[test]
fn local_hit_never_steals() {
    let pool = TestPool::new(4, config(2), 0);
    pin_to_cpu(1);
    let page = pool.allocator.alloc_page().expect("stolen page");
    pool.allocator.free_page(page);
    let again = pool.allocator.alloc_page().expect("local page");
    assert_eq!(again, page);
    assert_eq!(pool.allocator.cpu_stats(1).steals, 1);
    assert_eq!(pool.allocator.cpu_stats(0).steals, 0);
}

/// Leaves `counts[i]` pages on cpu `i`, seeding from the last cpu.
fn spread(counts: &[u32]) -> TestPool {
    let total: u32 = counts.iter().sum();
    let pool = TestPool::new(total as usize, config(counts.len()), counts.len() - 1);
    let mut pages = pool.drain();
    assert_eq!(pages.len() as u32, total);
    for (cpu, &count) in counts.iter().enumerate() {
        pin_to_cpu(cpu);
        for _ in 0..count {
            let page = pages.pop().expect("page to spread");
            pool.allocator.free_page(page);
        }
    }
    pool
}

fn alloc_n(pool: &TestPool, n: usize) -> Vec<PhysAddr> {
    (0..n)
        .map(|_| pool.allocator.alloc_page().expect("page"))
        .collect()
}

#[test]
fn one_donor_per_allocation() {
    let pool = spread(&[0, 1, 5]);
    assert_eq!(pool.free_counts(), vec![0, 1, 5]);

    pin_to_cpu(0);
    let first = pool.allocator.alloc_page().expect("from cpu 1");
    assert_eq!(pool.free_counts(), vec![0, 0, 5]);

    let second = pool.allocator.alloc_page().expect("from cpu 2");
    assert_eq!(pool.free_counts(), vec![4, 0, 0]);
    assert_eq!(pool.allocator.cpu_stats(0).steals, 2);
    assert_conserved(&pool, &[first, second]);
}

#[test]
fn donors_are_scanned_in_index_order_skipping_self() {
    let pool = spread(&[0, 2, 3, 5]);

    pin_to_cpu(1);
    let mut held = alloc_n(&pool, 2);
    held.extend(alloc_n(&pool, 1));
    assert_eq!(pool.free_counts(), vec![0, 2, 0, 5]);

    pin_to_cpu(3);
    held.extend(alloc_n(&pool, 5));
    held.extend(alloc_n(&pool, 1));
    assert_eq!(pool.free_counts(), vec![0, 0, 0, 1]);
    assert_eq!(pool.allocator.cpu_stats(3).pages_stolen, 2);

    assert_conserved(&pool, &held);
}

#[test]
fn owner_first_order_moves_the_same_pages() {
    let pool = TestPool::new(
        1500,
        config(2).with_steal_order(StealOrder::OwnerFirst),
        1,
    );
    pin_to_cpu(0);
    let page = pool.allocator.alloc_page().expect("stolen page");
    assert_eq!(page, pool.layout.page_addr(1499));
    assert_eq!(pool.free_counts(), vec![1023, 476]);
    assert_eq!(pool.free_list(1), pages_desc(&pool, 0..476));
    assert_conserved(&pool, &[page]);
}

#[test]
fn owner_first_scans_donors_in_index_order() {
    let pool = TestPool::new(6, config(3).with_steal_order(StealOrder::OwnerFirst), 2);
    let pages = pool.drain();
    pool.allocator.free_page(pages[1]);
    pin_to_cpu(1);
    pool.allocator.free_page(pages[0]);
    pin_to_cpu(0);
    assert_eq!(pool.allocator.alloc_page(), Some(pages[0]));
    assert_eq!(pool.free_counts(), vec![0, 0, 1]);
}

#[test]
fn ascending_thief_takes_a_page_freed_while_it_waited() {
    let pool = TestPool::new(8, config(2), 0);
    let allocator = pool.allocator;
    let page = allocator.alloc_page().expect("local page");

    // cpu 1 locks cpu 0's list first when stealing from it. Holding that
    // lock parks the thief between its local miss and the steal.
    let donor = allocator.lock_list(0);
    let thief = thread::spawn(move || {
        pin_to_cpu(1);
        allocator.alloc_page()
    });
    thread::sleep(Duration::from_millis(50));
    pin_to_cpu(1);
    allocator.free_page(page);
    drop(donor);

    // Whether the free landed before the local miss or during the wait,
    // the thief must not steal once its own list has a page.
    assert_eq!(thief.join().expect("thief panicked"), Some(page));
    assert_eq!(pool.free_counts(), vec![7, 0]);
    assert_eq!(allocator.cpu_stats(1).steals, 0);
    assert_conserved(&pool, &[page]);
}

#[test]
fn steal_just_past_one_batch_leaves_one_page() {
    let pool = TestPool::new(1025, config(2), 1);
    pin_to_cpu(0);
    let page = pool.allocator.alloc_page().expect("stolen page");
    assert_eq!(pool.free_counts(), vec![1023, 1]);
    assert_eq!(pool.free_list(1), vec![pool.layout.page_addr(0)]);
    assert_conserved(&pool, &[page]);
}

fn lcg(state: &mut u64) -> u64 {
    *state = state
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    *state >> 33
}

#[test]
fn concurrent_traffic_conserves_pages() {
    const CPUS: usize = 4;
    const ROUNDS: usize = 4000;
    const HELD_MAX: usize = 48;

    let pool = TestPool::new(256, config(CPUS), 0);
    let allocator = pool.allocator;
    let mailbox: Arc<Mutex<Vec<PhysAddr>>> = Arc::new(Mutex::new(Vec::new()));

    let workers: Vec<_> = (0..CPUS)
        .map(|cpu| {
            let mailbox = Arc::clone(&mailbox);
            thread::spawn(move || {
                pin_to_cpu(cpu);
                let mut seed = 0x9e37_79b9_7f4a_7c15 ^ cpu as u64;
                let mut held = Vec::new();
                for _ in 0..ROUNDS {
                    match lcg(&mut seed) % 4 {
                        0 | 1 if held.len() < HELD_MAX => {
                            if let Some(page) = allocator.alloc_page() {
                                held.push(page);
                            }
                        }
                        2 => {
                            // Hand a page to another cpu to free.
                            if let Some(page) = held.pop() {
                                mailbox.lock().unwrap().push(page);
                            }
                        }
                        _ => {
                            let page = mailbox.lock().unwrap().pop().or_else(|| held.pop());
                            if let Some(page) = page {
                                allocator.free_page(page);
                            }
                        }
                    }
                }
                held
            })
        })
        .collect();

    let mut outstanding: Vec<PhysAddr> = workers
        .into_iter()
        .flat_map(|worker| worker.join().expect("worker panicked"))
        .collect();
    outstanding.extend(mailbox.lock().unwrap().drain(..));

    assert_conserved(&pool, &outstanding);
    let stats = allocator.stats();
    assert_eq!(stats.allocated, outstanding.len() as u64);
}

#[test]
fn empty_cpus_stealing_from_each_other_make_progress() {
    const CPUS: usize = 4;
    const ROUNDS: usize = 500;

    let pool = TestPool::new(64, config(CPUS), 0);
    let allocator = pool.allocator;

    let workers: Vec<_> = (0..CPUS)
        .map(|cpu| {
            thread::spawn(move || {
                pin_to_cpu(cpu);
                for _ in 0..ROUNDS {
                    let mut held = Vec::new();
                    while let Some(page) = allocator.alloc_page() {
                        held.push(page);
                        if held.len() == 24 {
                            break;
                        }
                    }
                    for page in held {
                        allocator.free_page(page);
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker panicked");
    }

    assert_eq!(allocator.stats().free, 64);
    assert_conserved(&pool, &[]);
}
