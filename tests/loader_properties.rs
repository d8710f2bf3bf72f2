use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use page_preview::preview::{LoaderConfig, PageHandle, Preview, PreviewLoader, RenderSize};
use page_preview::test_utils::{CountingBackend, TestDocument};

const WAIT: Duration = Duration::from_secs(10);
const S1: RenderSize = RenderSize::new(120, 160);
const S2: RenderSize = RenderSize::new(60, 80);

type Deliveries = Rc<RefCell<Vec<(PageHandle, Option<Preview>)>>>;

fn collect(into: &Deliveries) -> impl FnOnce(PageHandle, Option<Preview>) + 'static {
    let into = Rc::clone(into);
    move |page, preview| into.borrow_mut().push((page, preview))
}

fn loader_with(
    pages: usize,
    radius: usize,
    workers: usize,
    backend: &CountingBackend,
) -> PreviewLoader<TestDocument, CountingBackend> {
    PreviewLoader::with_config(
        TestDocument::new(pages),
        backend.clone(),
        LoaderConfig {
            preload_radius: radius,
            workers,
            ..LoaderConfig::default()
        },
    )
}

#[test]
fn concurrent_requests_for_one_key_render_once() {
    let backend = CountingBackend::with_delay(Duration::from_millis(30));
    let mut loader = loader_with(10, 1, 4, &backend);
    loader.set_target_size(S1);
    let page = loader.page(5).unwrap();
    let deliveries: Deliveries = Rc::default();

    for _ in 0..8 {
        loader.request(page, collect(&deliveries));
    }
    assert_eq!(loader.pending_count(), 1);
    assert!(loader.wait_idle(WAIT));

    assert_eq!(backend.calls(), 1);
    let deliveries = deliveries.borrow();
    assert_eq!(deliveries.len(), 8);
    let first = deliveries[0].1.as_ref().unwrap();
    for (delivered_page, preview) in deliveries.iter() {
        assert_eq!(*delivered_page, page);
        let preview = preview.as_ref().unwrap();
        assert!(Arc::ptr_eq(&preview.bitmap, &first.bitmap));
    }
    let stats = loader.stats();
    assert_eq!(stats.renders, 1);
    assert_eq!(stats.coalesced + stats.hits, 7);
}

#[test]
fn distinct_keys_render_in_parallel() {
    let backend = CountingBackend::with_delay(Duration::from_millis(50));
    let mut loader = loader_with(10, 1, 4, &backend);
    loader.set_target_size(S1);

    for index in 1..=4 {
        loader.request_index(index, |_, _| {});
    }
    assert!(loader.wait_idle(WAIT));

    assert_eq!(backend.calls(), 4);
    assert!(backend.max_concurrent() > 1);
}

#[test]
fn duplicate_requests_do_not_hold_back_other_pages() {
    let backend = CountingBackend::with_delay(Duration::from_millis(200));
    let mut loader = loader_with(10, 1, 2, &backend);
    loader.set_target_size(S1);
    let deliveries: Deliveries = Rc::default();

    loader.request_index(1, collect(&deliveries));
    loader.request_index(1, collect(&deliveries));
    loader.request_index(2, collect(&deliveries));
    assert_eq!(loader.pending_count(), 2);
    assert!(loader.wait_idle(WAIT));

    assert_eq!(backend.calls(), 2);
    assert_eq!(
        backend.max_concurrent(),
        2,
        "page 2 renders alongside page 1"
    );
    assert_eq!(deliveries.borrow().len(), 3);
}

#[test]
fn cache_never_exceeds_capacity() {
    let backend = CountingBackend::new();
    let mut loader = loader_with(30, 1, 3, &backend);
    loader.set_target_size(S1);
    let capacity = loader.capacity();
    assert_eq!(capacity, 5);

    for index in 1..=30 {
        loader.request_index(index, |_, _| {});
        loader.poll_responses();
        assert!(loader.cache_len() <= capacity);
    }
    assert!(loader.wait_idle(WAIT));

    assert_eq!(loader.cache_len(), capacity);
    assert_eq!(loader.stats().evictions, 30 - capacity);
    // Gates for evicted pages are dropped along with the entries.
    assert!(loader.gate_count() <= capacity);
}

#[test]
fn preload_window_stays_resident() {
    let backend = CountingBackend::new();
    let mut loader = loader_with(20, 2, 4, &backend);
    assert_eq!(loader.capacity(), 7);
    loader.set_target_size(S1);

    // Leave older pages behind so the window has to displace them.
    for index in 1..=7 {
        loader.request_index(index, |_, _| {});
    }
    assert!(loader.wait_idle(WAIT));

    loader.request_index(10, |_, _| {});
    assert_eq!(loader.preload(10, 2), 4);
    assert!(loader.wait_idle(WAIT));

    for index in 8..=12 {
        let page = loader.page(index).unwrap();
        assert!(loader.is_cached(page), "page {index} was evicted");
    }
    assert!(loader.cache_len() <= 7);
}

#[test]
fn size_change_renders_fresh_and_serves_stale_meanwhile() {
    let backend = CountingBackend::new();
    let mut loader = loader_with(5, 1, 2, &backend);
    let page = loader.page(3).unwrap();
    let deliveries: Deliveries = Rc::default();

    loader.set_target_size(S1);
    loader.request(page, collect(&deliveries));
    assert!(loader.wait_idle(WAIT));
    assert_eq!(backend.calls_for(3, S1), 1);

    loader.set_target_size(S2);
    let immediate = loader.request(page, collect(&deliveries)).unwrap();
    assert_eq!(immediate.size, S1, "stale bitmap is served while rendering");
    assert!(loader.wait_idle(WAIT));

    assert_eq!(backend.calls_for(3, S2), 1);
    let deliveries = deliveries.borrow();
    let last = deliveries.last().unwrap().1.as_ref().unwrap();
    assert_eq!(last.size, S2);
    assert_eq!(last.bitmap.size(), S2);
    assert_eq!(loader.cached(page).unwrap().size, S2);
    assert_eq!(loader.stats().stale_serves, 1);
}

#[test]
fn size_change_during_render_still_caches_old_key() {
    let backend = CountingBackend::with_delay(Duration::from_millis(30));
    let mut loader = loader_with(5, 1, 2, &backend);
    let page = loader.page(2).unwrap();
    let deliveries: Deliveries = Rc::default();

    loader.set_target_size(S1);
    loader.request(page, collect(&deliveries));
    loader.set_target_size(S2);
    assert!(loader.wait_idle(WAIT));

    let delivered = deliveries.borrow()[0].1.clone().unwrap();
    assert_eq!(delivered.size, S1);
    assert!(loader.cached(page).is_none());

    loader.set_target_size(S1);
    assert!(loader.cached(page).is_some());
}

#[test]
fn preload_skips_pages_outside_document() {
    let backend = CountingBackend::new();
    let mut loader = loader_with(5, 3, 2, &backend);
    loader.set_target_size(S1);

    assert_eq!(loader.preload(1, 3), 3);
    assert!(loader.wait_idle(WAIT));

    let mut rendered = backend.rendered_pages();
    rendered.sort_unstable();
    assert_eq!(rendered, vec![2, 3, 4]);
    assert_eq!(loader.stats().skipped, 3);

    // 2..4 are cached already; only 1 and 5 are new.
    assert_eq!(loader.preload(3, 3), 2);
    assert!(loader.wait_idle(WAIT));
    assert_eq!(backend.calls(), 5);
}

#[test]
fn failed_render_is_not_cached_and_retries() {
    let backend = CountingBackend::new();
    let mut loader = loader_with(5, 1, 2, &backend);
    loader.set_target_size(S1);
    let page = loader.page(4).unwrap();
    let deliveries: Deliveries = Rc::default();

    backend.fail_page(4);
    loader.request(page, collect(&deliveries));
    assert!(loader.wait_idle(WAIT));
    assert!(deliveries.borrow()[0].1.is_none());
    assert_eq!(loader.cache_len(), 0);
    assert_eq!(loader.stats().failures, 1);

    backend.heal(4);
    loader.request(page, collect(&deliveries));
    assert!(loader.wait_idle(WAIT));

    assert_eq!(backend.calls_for(4, S1), 2);
    assert!(deliveries.borrow()[1].1.is_some());
    assert!(loader.is_cached(page));
}

#[test]
fn failure_on_one_page_does_not_affect_others() {
    let backend = CountingBackend::new();
    let mut loader = loader_with(5, 1, 2, &backend);
    loader.set_target_size(S1);
    backend.fail_page(2);

    let deliveries: Deliveries = Rc::default();
    loader.request_index(2, collect(&deliveries));
    loader.request_index(3, collect(&deliveries));
    assert!(loader.wait_idle(WAIT));

    let deliveries = deliveries.borrow();
    let by_page = |index: usize| {
        deliveries
            .iter()
            .find(|(page, _)| page.index == index)
            .map(|(_, preview)| preview.is_some())
    };
    assert_eq!(by_page(2), Some(false));
    assert_eq!(by_page(3), Some(true));
}

#[test]
fn loaders_are_independent() {
    let backend_a = CountingBackend::new();
    let backend_b = CountingBackend::new();
    let mut a = loader_with(5, 1, 1, &backend_a);
    let mut b = loader_with(5, 1, 1, &backend_b);
    a.set_target_size(S1);
    b.set_target_size(S1);

    a.request_index(1, |_, _| {});
    assert!(a.wait_idle(WAIT));
    b.request_index(1, |_, _| {});
    assert!(b.wait_idle(WAIT));

    assert_eq!(backend_a.calls(), 1);
    assert_eq!(backend_b.calls(), 1);
    drop(a);
    assert_eq!(b.cache_len(), 1);
}
