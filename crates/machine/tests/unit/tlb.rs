//! Software TLB unit tests.
//!
//! Verifies the direct-indexed lookup, the alignment-aware tag match that
//! forces misaligned accesses onto the slow path, and the flush operations.

use rvproof_machine::tlb::{Tlb, TlbSet};

/// A fake page of host memory to point entries at.
fn host_page() -> Vec<u8> {
    vec![0u8; 4096]
}

#[test]
fn empty_tlb_misses() {
    let tlb = Tlb::default();
    assert_eq!(tlb.hit(0x8000_0000, 8), None);
}

#[test]
fn fill_then_hit_returns_host_address() {
    let mut tlb = Tlb::default();
    let page = host_page();
    let vaddr = 0x8000_0000u64;
    tlb.fill(vaddr, page.as_ptr() as *mut u8);

    let host = tlb.hit(vaddr + 0x10, 8);
    assert_eq!(host, Some(page.as_ptr() as usize + 0x10));
}

#[test]
fn misaligned_access_misses_even_when_cached() {
    let mut tlb = Tlb::default();
    let page = host_page();
    tlb.fill(0x8000_0000, page.as_ptr() as *mut u8);

    assert!(tlb.hit(0x8000_0004, 8).is_none());
    assert!(tlb.hit(0x8000_0001, 2).is_none());
    // The same addresses hit at their own alignment.
    assert!(tlb.hit(0x8000_0004, 4).is_some());
    assert!(tlb.hit(0x8000_0001, 1).is_some());
}

#[test]
fn different_page_same_index_misses() {
    let mut tlb = Tlb::default();
    let page = host_page();
    tlb.fill(0x8000_0000, page.as_ptr() as *mut u8);
    // 256 pages later the index wraps to the same slot.
    assert!(tlb.hit(0x8000_0000 + (256 << 12), 8).is_none());
}

#[test]
fn aliasing_fill_evicts_previous_entry() {
    let mut tlb = Tlb::default();
    let a = host_page();
    let b = host_page();
    let vaddr_a = 0x8000_0000u64;
    let vaddr_b = vaddr_a + (256 << 12);
    tlb.fill(vaddr_a, a.as_ptr() as *mut u8);
    tlb.fill(vaddr_b, b.as_ptr() as *mut u8);

    assert!(tlb.hit(vaddr_a, 8).is_none());
    assert_eq!(tlb.hit(vaddr_b, 8), Some(b.as_ptr() as usize));
}

#[test]
fn flush_invalidates_everything() {
    let mut tlb = Tlb::default();
    let page = host_page();
    tlb.fill(0x8000_0000, page.as_ptr() as *mut u8);
    tlb.flush();
    assert!(tlb.hit(0x8000_0000, 8).is_none());
}

#[test]
fn flush_host_range_is_selective() {
    let mut tlb = Tlb::default();
    let a = host_page();
    let b = host_page();
    tlb.fill(0x8000_0000, a.as_ptr() as *mut u8);
    tlb.fill(0x8000_1000, b.as_ptr() as *mut u8);

    tlb.flush_host_range(a.as_ptr() as usize, a.len());
    assert!(tlb.hit(0x8000_0000, 8).is_none());
    assert!(tlb.hit(0x8000_1000, 8).is_some());
}

#[test]
fn tlb_set_flush_all() {
    let mut set = TlbSet::default();
    let page = host_page();
    set.read.fill(0x1000, page.as_ptr() as *mut u8);
    set.write.fill(0x1000, page.as_ptr() as *mut u8);
    set.fetch.fill(0x1000, page.as_ptr() as *mut u8);
    set.flush_all();
    assert!(set.read.hit(0x1000, 8).is_none());
    assert!(set.write.hit(0x1000, 8).is_none());
    assert!(set.fetch.hit(0x1000, 8).is_none());
}
