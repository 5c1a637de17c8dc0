use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use assert_matches::assert_matches;

use catalog_harvester::catalog::{CatalogWalker, Page, PagedListing, batched};
use catalog_harvester::dispatch::Dispatcher;
use catalog_harvester::error::HarvestError;

#[test]
fn panicking_item_does_not_poison_batch() {
    let dispatcher = Dispatcher::new(3, Duration::ZERO);
    let items = (0..6).collect::<Vec<u32>>();
    let results = dispatcher.run_batch(&items, |&n| {
        if n == 2 {
            panic!("boom");
        }
        Ok(n)
    });

    assert_eq!(results.len(), 6);
    assert_matches!(results[2], Some(Err(HarvestError::WorkerPanic(_))));
    for (index, slot) in results.iter().enumerate().filter(|(index, _)| *index != 2) {
        assert_matches!(slot, Some(Ok(n)) if *n as usize == index);
    }
}

#[test]
fn cancel_stops_before_next_item() {
    let dispatcher = Dispatcher::new(1, Duration::ZERO);
    let started = AtomicUsize::new(0);
    let items = (0..5).collect::<Vec<u32>>();
    let outcome = dispatcher.run(vec![Ok(items.clone()), Ok(items)], |&n| {
        started.fetch_add(1, Ordering::SeqCst);
        if n == 1 {
            dispatcher.cancel();
        }
        Ok(n)
    });

    assert_eq!(started.load(Ordering::SeqCst), 2);
    assert!(outcome.summary.cancelled);
    assert_eq!(outcome.summary.batches, 1);
    assert_eq!(outcome.summary.succeeded, 2);
    assert_eq!(outcome.summary.not_started, 3);
    assert_eq!(outcome.reports, vec![0, 1]);
}

#[test]
fn cancel_flag_is_shared() {
    let dispatcher = Dispatcher::new(2, Duration::ZERO);
    let flag = dispatcher.cancel_flag();
    flag.store(true, Ordering::SeqCst);
    assert!(dispatcher.is_cancelled());

    let outcome = dispatcher.run(vec![Ok(vec![1u32, 2])], |&n| Ok(n));
    assert_eq!(outcome.summary.batches, 0);
    assert!(outcome.reports.is_empty());
}

#[test]
fn failures_and_listing_errors_are_counted() {
    let dispatcher = Dispatcher::new(2, Duration::ZERO);
    let batches = vec![
        Ok(vec![1u32, 2, 3]),
        Err(HarvestError::CatalogHttp("timeout".to_string())),
        Ok(vec![4]),
    ];
    let outcome = dispatcher.run(batches, |&n| {
        if n % 2 == 0 {
            Err(HarvestError::Http(format!("item {n}")))
        } else {
            Ok(n)
        }
    });

    let summary = outcome.summary;
    assert_eq!(summary.batches, 2);
    assert_eq!(summary.items, 4);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.listing_errors, 1);
    assert!(!summary.cancelled);
    assert_eq!(outcome.reports, vec![1, 3]);
}

#[test]
fn batches_finish_before_next_starts() {
    let dispatcher = Dispatcher::new(4, Duration::ZERO);
    let log = Mutex::new(Vec::new());
    let batches = vec![Ok(vec![(0, 1), (0, 2), (0, 3)]), Ok(vec![(1, 4), (1, 5)])];
    dispatcher.run(batches, |&(batch, n)| {
        log.lock().unwrap().push(batch);
        Ok(n)
    });
    let log = log.into_inner().unwrap();
    assert_eq!(log, vec![0, 0, 0, 1, 1]);
}

#[test]
fn single_batch_run_skips_cooldown() {
    let dispatcher = Dispatcher::new(2, Duration::from_secs(5));
    let started = Instant::now();
    let outcome = dispatcher.run(vec![Ok(vec![1u32, 2, 3])], |&n| Ok(n));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(outcome.summary.batches, 1);
    assert_eq!(outcome.summary.succeeded, 3);
}

#[test]
fn cooldown_only_separates_batches() {
    let cooldown = Duration::from_millis(500);
    let dispatcher = Dispatcher::new(1, cooldown);
    let started = Instant::now();
    let outcome = dispatcher.run(vec![Ok(vec![1u32]), Ok(vec![2]), Ok(vec![3])], |&n| Ok(n));
    let elapsed = started.elapsed();
    assert_eq!(outcome.summary.batches, 3);
    assert!(elapsed >= cooldown * 2, "{elapsed:?}");
    assert!(elapsed < cooldown * 3, "{elapsed:?}");
}

struct NumberPages {
    pages: Vec<Result<Vec<u32>, &'static str>>,
    calls: AtomicUsize,
}

impl PagedListing for NumberPages {
    type Item = u32;

    fn page(&self, cursor: Option<&str>) -> Result<Page<u32>, HarvestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let index = cursor.map(|value| value.parse::<usize>().unwrap()).unwrap_or(0);
        match self.pages.get(index) {
            Some(Ok(items)) => Ok(Page {
                items: items.clone(),
                next: Some((index + 1).to_string()),
            }),
            Some(Err(message)) => Err(HarvestError::CatalogHttp(message.to_string())),
            None => Ok(Page {
                items: Vec::new(),
                next: None,
            }),
        }
    }
}

#[test]
fn walker_is_lazy_and_stops_after_error() {
    let listing = NumberPages {
        pages: vec![Ok(vec![1, 2]), Ok(vec![3]), Err("down"), Ok(vec![9])],
        calls: AtomicUsize::new(0),
    };
    let mut walker = CatalogWalker::new(&listing);
    assert_eq!(listing.calls.load(Ordering::SeqCst), 0);
    assert_eq!(walker.next().unwrap().unwrap(), vec![1, 2]);
    assert_eq!(listing.calls.load(Ordering::SeqCst), 1);
    assert_eq!(walker.next().unwrap().unwrap(), vec![3]);
    assert_matches!(walker.next(), Some(Err(HarvestError::CatalogHttp(_))));
    assert!(walker.next().is_none());
    assert_eq!(listing.calls.load(Ordering::SeqCst), 3);
}

#[test]
fn batched_items_flush_before_error() {
    let listing = NumberPages {
        pages: vec![Ok(vec![1, 2, 3]), Ok(vec![4, 5]), Err("down")],
        calls: AtomicUsize::new(0),
    };
    let batches = batched(CatalogWalker::new(&listing).items(), 2).collect::<Vec<_>>();
    assert_eq!(batches.len(), 4);
    assert_eq!(batches[0].as_ref().unwrap(), &vec![1, 2]);
    assert_eq!(batches[1].as_ref().unwrap(), &vec![3, 4]);
    assert_eq!(batches[2].as_ref().unwrap(), &vec![5]);
    assert_matches!(batches[3], Err(HarvestError::CatalogHttp(_)));
}
