//! Dual-queue media event loop: one worker thread drains local operations,
//! a second drains remote ones in bounded-parallelism sub-batches over a
//! shared blocking HTTP client. Each thread owns its own mutex, condvar and
//! queue; there is no async runtime anywhere in this module.

use crate::error::MediaError;
use crate::media::image::Image;
use crate::media::operation::OperationOutcome;
use crate::media::video::Video;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use tracing::warn;

const DEFAULT_REMOTE_PARALLELISM: usize = 10;

pub enum MediaObject {
    Image(Box<Image>),
    Video(Box<Video>),
}

impl MediaObject {
    fn execute_operation(&mut self) -> Result<OperationOutcome, MediaError> {
        match self {
            MediaObject::Image(image) => image.execute_operation(),
            MediaObject::Video(video) => video.execute_operation(),
        }
    }

    fn run_remote(&mut self, client: &reqwest::blocking::Client, id: &str) -> Result<(), MediaError> {
        match self {
            MediaObject::Image(image) => image.run_remote(client, id),
            MediaObject::Video(video) => video.run_remote(client, id),
        }
    }

    fn pending_count(&self) -> usize {
        match self {
            MediaObject::Image(image) => image.pending_count(),
            MediaObject::Video(video) => video.pending_count(),
        }
    }
}

struct WorkItem {
    index: usize,
    id: String,
    object: MediaObject,
}

enum QueueEntry {
    Item(WorkItem),
    /// Unblocks a condvar wait at shutdown without requiring real work.
    Shutdown,
}

struct Queue {
    items: Mutex<VecDeque<QueueEntry>>,
    condvar: Condvar,
}

impl Queue {
    fn new() -> Self {
        Queue { items: Mutex::new(VecDeque::new()), condvar: Condvar::new() }
    }

    fn push(&self, entry: QueueEntry) {
        let mut guard = self.items.lock().unwrap();
        guard.push_back(entry);
        self.condvar.notify_one();
    }

    fn pop_blocking(&self) -> QueueEntry {
        let mut guard = self.items.lock().unwrap();
        loop {
            if let Some(entry) = guard.pop_front() {
                return entry;
            }
            guard = self.condvar.wait(guard).unwrap();
        }
    }

    /// Drains whatever is queued once at least one entry is available,
    /// rather than blocking for a fixed count: objects that need no remote
    /// step never reach this queue at all, so draining on wake keeps
    /// sub-batches flowing instead of waiting for a batch-wide total.
    fn drain_blocking(&self) -> Vec<QueueEntry> {
        let mut guard = self.items.lock().unwrap();
        while guard.is_empty() {
            guard = self.condvar.wait(guard).unwrap();
        }
        guard.drain(..).collect()
    }
}

type Results = Mutex<Vec<Option<(usize, Result<MediaObject, MediaError>)>>>;

struct Completion {
    results: Results,
    remaining: Mutex<usize>,
    condvar: Condvar,
}

impl Completion {
    fn finish(&self, index: usize, outcome: Result<MediaObject, MediaError>) {
        self.results.lock().unwrap()[index] = Some((index, outcome));
        let mut remaining = self.remaining.lock().unwrap();
        *remaining -= 1;
        if *remaining == 0 {
            self.condvar.notify_all();
        }
    }

    fn wait_until_done(&self) {
        let mut remaining = self.remaining.lock().unwrap();
        while *remaining > 0 {
            remaining = self.condvar.wait(remaining).unwrap();
        }
    }
}

pub struct BatchResult {
    pub completed: Vec<(usize, Result<MediaObject, MediaError>)>,
}

/// One dual-queue event loop, spun up per media-returning batch and torn
/// down at the end of it.
pub struct EventLoop {
    client: Arc<reqwest::blocking::Client>,
    remote_parallelism: usize,
}

impl EventLoop {
    pub fn new(client: reqwest::blocking::Client) -> Self {
        EventLoop { client: Arc::new(client), remote_parallelism: DEFAULT_REMOTE_PARALLELISM }
    }

    pub fn with_remote_parallelism(mut self, parallelism: usize) -> Self {
        self.remote_parallelism = parallelism.max(1);
        self
    }

    /// Drives every `(index, id, object)` through local and remote
    /// processing until each has either finished or failed, preserving the
    /// original batch order in the returned results.
    pub fn run_batch(&self, objects: Vec<(usize, String, MediaObject)>) -> BatchResult {
        let total = objects.len();
        let completion = Arc::new(Completion {
            results: Mutex::new((0..total).map(|_| None).collect()),
            remaining: Mutex::new(total),
            condvar: Condvar::new(),
        });

        let local_queue = Arc::new(Queue::new());
        let remote_queue = Arc::new(Queue::new());

        for (index, id, object) in objects {
            local_queue.push(QueueEntry::Item(WorkItem { index, id, object }));
        }

        let local_handle = spawn_local_thread(Arc::clone(&local_queue), Arc::clone(&remote_queue), Arc::clone(&completion));
        let remote_handle = spawn_remote_thread(
            Arc::clone(&remote_queue),
            Arc::clone(&local_queue),
            Arc::clone(&completion),
            Arc::clone(&self.client),
            self.remote_parallelism,
        );

        completion.wait_until_done();

        local_queue.push(QueueEntry::Shutdown);
        remote_queue.push(QueueEntry::Shutdown);
        let _ = local_handle.join();
        let _ = remote_handle.join();

        let completion = Arc::try_unwrap(completion)
            .unwrap_or_else(|_| panic!("event loop threads outlived the batch they were processing"));
        let results = completion.results.into_inner().unwrap();
        BatchResult { completed: results.into_iter().flatten().collect() }
    }
}

fn spawn_local_thread(local_queue: Arc<Queue>, remote_queue: Arc<Queue>, completion: Arc<Completion>) -> JoinHandle<()> {
    std::thread::spawn(move || loop {
        match local_queue.pop_blocking() {
            QueueEntry::Shutdown => break,
            QueueEntry::Item(mut item) => loop {
                match item.object.execute_operation() {
                    Ok(OperationOutcome::LocalDone) => {
                        if item.object.pending_count() == 0 {
                            completion.finish(item.index, Ok(item.object));
                            break;
                        }
                    }
                    Ok(OperationOutcome::HandedToRemote) => {
                        remote_queue.push(QueueEntry::Item(item));
                        break;
                    }
                    Err(e) => {
                        warn!(index = item.index, error = %e, "local media operation failed");
                        completion.finish(item.index, Err(e));
                        break;
                    }
                }
            },
        }
    })
}

fn spawn_remote_thread(
    remote_queue: Arc<Queue>,
    local_queue: Arc<Queue>,
    completion: Arc<Completion>,
    client: Arc<reqwest::blocking::Client>,
    parallelism: usize,
) -> JoinHandle<()> {
    std::thread::spawn(move || loop {
        let drained = remote_queue.drain_blocking();
        let mut items = Vec::new();
        let mut shutting_down = false;
        for entry in drained {
            match entry {
                QueueEntry::Shutdown => shutting_down = true,
                QueueEntry::Item(item) => items.push(item),
            }
        }

        let mut remaining_items = items;
        while !remaining_items.is_empty() {
            let rest = remaining_items.split_off(parallelism.min(remaining_items.len()));
            let chunk = std::mem::replace(&mut remaining_items, rest);

            let processed: Vec<(WorkItem, Result<(), MediaError>)> = std::thread::scope(|scope| {
                let handles: Vec<_> = chunk
                    .into_iter()
                    .map(|mut item| {
                        let client = Arc::clone(&client);
                        scope.spawn(move || {
                            let outcome = item.object.run_remote(&client, &item.id);
                            (item, outcome)
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });

            for (item, outcome) in processed {
                match outcome {
                    Err(e) => {
                        warn!(index = item.index, error = %e, "remote media operation failed");
                        completion.finish(item.index, Err(e));
                    }
                    Ok(()) if item.object.pending_count() == 0 => completion.finish(item.index, Ok(item.object)),
                    Ok(()) => local_queue.push(QueueEntry::Item(item)),
                }
            }
        }

        if shutting_down {
            break;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::format::Format;
    use crate::media::operation::Operation;

    fn sample_png() -> Vec<u8> {
        let buf = image::RgbImage::from_pixel(40, 40, image::Rgb([10, 20, 30]));
        let mut out = Vec::new();
        image::DynamicImage::ImageRgb8(buf)
            .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn local_only_batch_completes_without_touching_the_remote_thread() {
        let event_loop = EventLoop::new(reqwest::blocking::Client::new());
        let mut image = Image::decode(Format::Png, &sample_png()).unwrap();
        image.enqueue(Operation::Resize { height: 10, width: 10 }).unwrap();

        let result = event_loop.run_batch(vec![(0, "obj-0".into(), MediaObject::Image(Box::new(image)))]);
        assert_eq!(result.completed.len(), 1);
        assert!(result.completed[0].1.is_ok());
    }

    #[test]
    fn batch_ordering_is_preserved_across_indices() {
        let event_loop = EventLoop::new(reqwest::blocking::Client::new());
        let mut objects = Vec::new();
        for i in 0..5 {
            let mut image = Image::decode(Format::Png, &sample_png()).unwrap();
            image.enqueue(Operation::Threshold { value: 5.0 }).unwrap();
            objects.push((i, format!("obj-{i}"), MediaObject::Image(Box::new(image))));
        }
        let result = event_loop.run_batch(objects);
        let mut indices: Vec<usize> = result.completed.iter().map(|(i, _)| *i).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }
}
