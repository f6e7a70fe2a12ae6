//! Background detection worker and its request/response client.
//!
//! The worker owns one thread that answers every [`DetectRequest`] with
//! exactly one [`DetectResponse`]. [`DetectClient`] correlates responses by
//! [`RequestId`] and enforces a per-request deadline. Each request moves
//! through `Pending -> Resolved | Rejected | TimedOut`; the client's pending
//! map only ever holds `Pending` entries. Every submission also carries a
//! per-client ticket that the worker echoes back, so a late answer to a
//! timed-out request is dropped even when its id has been reused.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use image::RgbaImage;
use log::{debug, warn};

use crate::detection::{run_detection, DetectConfig, DetectPayload, Detection};
use crate::error::{Error, Result};
use crate::search::{Match, ThreadYield};
use crate::template::Template;
use crate::working::WorkingCopy;

/// Opaque identifier correlating a request with its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    /// The identifier as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A detection request. Its payload buffers move to the worker.
#[derive(Debug)]
pub struct DetectRequest {
    /// Correlation id.
    pub id: RequestId,
    /// Per-client submission number; echoed in the response.
    pub ticket: u64,
    /// What to search.
    pub payload: DetectPayload,
}

/// The single answer to a [`DetectRequest`].
#[derive(Debug, Clone)]
pub struct DetectResponse {
    /// Correlation id of the request.
    pub id: RequestId,
    /// Ticket of the request being answered.
    pub ticket: u64,
    /// The detection, or the worker's error message.
    pub outcome: std::result::Result<Detection, String>,
}

/// Lifecycle of a request as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Submitted, no response yet.
    Pending,
    /// Answered with a detection.
    Resolved,
    /// Answered with an error, or the worker went away.
    Rejected,
    /// The deadline passed first.
    TimedOut,
}

fn serve(
    requests: &Receiver<DetectRequest>,
    responses: &Sender<DetectResponse>,
    config: &DetectConfig,
) {
    for DetectRequest {
        id,
        ticket,
        payload,
    } in requests
    {
        debug!("worker picked up request {id} (#{ticket})");
        let outcome = run_detection(payload, config, &mut ThreadYield).map_err(|e| e.to_string());
        let response = DetectResponse {
            id,
            ticket,
            outcome,
        };
        if responses.send(response).is_err() {
            break;
        }
    }
    debug!("detection worker shutting down");
}

/// A submitted request awaiting its answer.
#[derive(Debug, Clone, Copy)]
struct InFlight {
    ticket: u64,
    submitted: Instant,
}

/// Client side of the detection boundary.
///
/// At most one request is outstanding at a time.
pub struct DetectClient {
    requests: Option<Sender<DetectRequest>>,
    responses: Receiver<DetectResponse>,
    pending: HashMap<RequestId, InFlight>,
    settled: HashMap<RequestId, RequestState>,
    next_ticket: u64,
    worker: Option<JoinHandle<()>>,
}

impl DetectClient {
    /// Start a detection worker thread and connect to it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the thread cannot be spawned.
    pub fn spawn(config: DetectConfig) -> Result<Self> {
        let (request_tx, request_rx) = unbounded();
        let (response_tx, response_rx) = unbounded();
        let worker = thread::Builder::new()
            .name("detect-worker".to_string())
            .spawn(move || serve(&request_rx, &response_tx, &config))?;

        let mut client = Self::connect(request_tx, response_rx);
        client.worker = Some(worker);
        Ok(client)
    }

    /// Wrap an existing pair of channels served by some other host.
    ///
    /// The host must answer each request once, echoing its id and ticket.
    #[must_use]
    pub fn connect(requests: Sender<DetectRequest>, responses: Receiver<DetectResponse>) -> Self {
        Self {
            requests: Some(requests),
            responses,
            pending: HashMap::new(),
            settled: HashMap::new(),
            next_ticket: 0,
            worker: None,
        }
    }

    /// Current state of the latest request submitted under `id`, or `None`
    /// if `id` was never submitted.
    #[must_use]
    pub fn state(&self, id: &RequestId) -> Option<RequestState> {
        if self.pending.contains_key(id) {
            Some(RequestState::Pending)
        } else {
            self.settled.get(id).copied()
        }
    }

    /// Number of pending requests.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Send a request to the worker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RequestInFlight`] while another request is pending
    /// and [`Error::WorkerDisconnected`] if the worker is gone.
    pub fn submit(
        &mut self,
        id: impl Into<RequestId>,
        payload: DetectPayload,
    ) -> Result<RequestId> {
        if let Some(busy) = self.pending.keys().next() {
            return Err(Error::RequestInFlight {
                id: busy.to_string(),
            });
        }
        let id = id.into();
        let ticket = self.next_ticket;
        let sender = self.requests.as_ref().ok_or(Error::WorkerDisconnected)?;
        sender
            .send(DetectRequest {
                id: id.clone(),
                ticket,
                payload,
            })
            .map_err(|_| Error::WorkerDisconnected)?;
        self.next_ticket += 1;
        self.settled.remove(&id);
        self.pending.insert(
            id.clone(),
            InFlight {
                ticket,
                submitted: Instant::now(),
            },
        );
        Ok(id)
    }

    /// Block until `id` settles or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownRequest`] if `id` is not pending.
    /// - [`Error::Rejected`] if the worker answered with an error.
    /// - [`Error::Timeout`] if the deadline passed first.
    /// - [`Error::WorkerDisconnected`] if the worker went away.
    pub fn wait(&mut self, id: &RequestId, timeout: Duration) -> Result<Detection> {
        let Some(&InFlight { ticket, .. }) = self.pending.get(id) else {
            return Err(Error::UnknownRequest { id: id.to_string() });
        };
        let deadline = Instant::now() + timeout;

        loop {
            match self.responses.recv_deadline(deadline) {
                Ok(response) if response.id == *id && response.ticket == ticket => {
                    return match response.outcome {
                        Ok(detection) => {
                            self.settle(id, RequestState::Resolved);
                            Ok(detection)
                        }
                        Err(message) => {
                            self.settle(id, RequestState::Rejected);
                            Err(Error::Rejected {
                                id: id.to_string(),
                                message,
                            })
                        }
                    };
                }
                Ok(late) => {
                    debug!(
                        "discarding response for settled request {} (#{})",
                        late.id, late.ticket
                    );
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.settle(id, RequestState::TimedOut);
                    return Err(Error::Timeout { id: id.to_string() });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.settle(id, RequestState::Rejected);
                    return Err(Error::WorkerDisconnected);
                }
            }
        }
    }

    /// Submit and wait in one call.
    ///
    /// # Errors
    ///
    /// See [`DetectClient::submit`] and [`DetectClient::wait`].
    pub fn detect(
        &mut self,
        id: impl Into<RequestId>,
        payload: DetectPayload,
        timeout: Duration,
    ) -> Result<Detection> {
        let id = self.submit(id, payload)?;
        self.wait(&id, timeout)
    }

    /// Detect `template` in a full-resolution image through the worker.
    ///
    /// The working copy is built here and its luminance moved across, so the
    /// worker needs no rasterization. The match comes back in full-resolution
    /// coordinates.
    ///
    /// # Errors
    ///
    /// See [`DetectClient::detect`].
    pub fn detect_image(
        &mut self,
        id: impl Into<RequestId>,
        image: &RgbaImage,
        template: &Template,
        config: &DetectConfig,
        timeout: Duration,
    ) -> Result<Option<Match>> {
        let working = WorkingCopy::new(image, config.max_working_width);
        let payload = DetectPayload::Array {
            source: working.gray,
            template: template.gray().clone(),
            scale_to_full: working.scale_to_full,
        };
        let detection = self.detect(id, payload, timeout)?;
        Ok(detection.full_resolution(image.width(), image.height()))
    }

    /// Detect with a shared image and template, searched on the worker.
    ///
    /// # Errors
    ///
    /// See [`DetectClient::detect`].
    pub fn detect_shared(
        &mut self,
        id: impl Into<RequestId>,
        image: Arc<RgbaImage>,
        template: Arc<Template>,
        timeout: Duration,
    ) -> Result<Option<Match>> {
        let (w, h) = image.dimensions();
        let detection = self.detect(id, DetectPayload::Raster { image, template }, timeout)?;
        Ok(detection.full_resolution(w, h))
    }

    fn settle(&mut self, id: &RequestId, state: RequestState) {
        if let Some(flight) = self.pending.remove(id) {
            debug!(
                "request {id} (#{}): Pending -> {state:?} after {:?}",
                flight.ticket,
                flight.submitted.elapsed()
            );
            self.settled.insert(id.clone(), state);
        }
    }
}

impl Drop for DetectClient {
    fn drop(&mut self) {
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("detection worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grayscale::GrayBuffer;
    use crate::testutil::{ring_mark, scene, to_rgba};

    const GENEROUS: Duration = Duration::from_secs(120);

    fn array_payload() -> DetectPayload {
        let mark = ring_mark();
        DetectPayload::Array {
            source: scene(&mark, 200, 150, 40, 40),
            template: mark,
            scale_to_full: 1.0,
        }
    }

    fn found_at(x: u32, y: u32) -> Detection {
        Detection {
            found: Some(Match {
                x,
                y,
                w: 10,
                h: 10,
                score: 0.95,
            }),
            scale_to_full: 1.0,
        }
    }

    #[test]
    fn request_resolves_exactly_once() {
        let mut client = DetectClient::spawn(DetectConfig::default()).unwrap();
        let id = client.submit("abc", array_payload()).unwrap();
        assert_eq!(client.state(&id), Some(RequestState::Pending));

        let detection = client.wait(&id, GENEROUS).unwrap();
        let found = detection.found.expect("match");
        assert_eq!((found.x, found.y), (40, 40));

        assert_eq!(client.state(&id), Some(RequestState::Resolved));
        assert_eq!(client.pending_count(), 0);
        assert!(matches!(
            client.wait(&id, GENEROUS),
            Err(Error::UnknownRequest { .. })
        ));
        assert_eq!(client.state(&RequestId::from("never")), None);
    }

    #[test]
    fn worker_serves_consecutive_requests() {
        let mut client = DetectClient::spawn(DetectConfig::default()).unwrap();
        let mark = ring_mark();
        let image = to_rgba(&scene(&mark, 200, 150, 40, 40));
        let template = Template::from_gray(mark);

        let first = client
            .detect_image("one", &image, &template, &DetectConfig::default(), GENEROUS)
            .unwrap();
        let second = client
            .detect_shared("two", Arc::new(image), Arc::new(template), GENEROUS)
            .unwrap();
        assert_eq!(first, second);
        assert!(first.is_some());
    }

    #[test]
    fn only_one_request_in_flight() {
        let (request_tx, _request_rx) = unbounded();
        let (_response_tx, response_rx) = unbounded();
        let mut client = DetectClient::connect(request_tx, response_rx);

        client.submit("first", array_payload()).unwrap();
        assert!(matches!(
            client.submit("second", array_payload()),
            Err(Error::RequestInFlight { id }) if id == "first"
        ));
    }

    #[test]
    fn timeout_settles_and_discards_late_response() {
        let (request_tx, request_rx) = unbounded();
        let (response_tx, response_rx) = unbounded();
        let mut client = DetectClient::connect(request_tx, response_rx);

        let abc = client.submit("abc", array_payload()).unwrap();
        assert!(matches!(
            client.wait(&abc, Duration::from_millis(20)),
            Err(Error::Timeout { id }) if id == "abc"
        ));
        assert_eq!(client.pending_count(), 0);
        assert_eq!(client.state(&abc), Some(RequestState::TimedOut));
        let stale = request_rx.try_recv().unwrap();
        assert_eq!(stale.id, abc);

        // The worker answers "abc" too late, then answers the next request.
        let def = client.submit("def", array_payload()).unwrap();
        let fresh = request_rx.try_recv().unwrap();
        response_tx
            .send(DetectResponse {
                id: abc.clone(),
                ticket: stale.ticket,
                outcome: Ok(found_at(1, 1)),
            })
            .unwrap();
        response_tx
            .send(DetectResponse {
                id: def.clone(),
                ticket: fresh.ticket,
                outcome: Ok(found_at(2, 2)),
            })
            .unwrap();

        let detection = client.wait(&def, GENEROUS).unwrap();
        assert_eq!(detection, found_at(2, 2));
        assert!(matches!(
            client.wait(&abc, GENEROUS),
            Err(Error::UnknownRequest { .. })
        ));
    }

    #[test]
    fn reused_id_ignores_answer_to_timed_out_request() {
        let (request_tx, request_rx) = unbounded();
        let (response_tx, response_rx) = unbounded();
        let mut client = DetectClient::connect(request_tx, response_rx);

        let abc = client.submit("abc", array_payload()).unwrap();
        assert!(matches!(
            client.wait(&abc, Duration::from_millis(10)),
            Err(Error::Timeout { .. })
        ));
        let stale = request_rx.try_recv().unwrap();

        let again = client.submit("abc", array_payload()).unwrap();
        assert_eq!(client.state(&again), Some(RequestState::Pending));
        let fresh = request_rx.try_recv().unwrap();
        assert_ne!(stale.ticket, fresh.ticket);

        response_tx
            .send(DetectResponse {
                id: abc.clone(),
                ticket: stale.ticket,
                outcome: Err("stale".to_string()),
            })
            .unwrap();
        response_tx
            .send(DetectResponse {
                id: abc,
                ticket: fresh.ticket,
                outcome: Ok(found_at(3, 3)),
            })
            .unwrap();

        assert_eq!(client.wait(&again, GENEROUS).unwrap(), found_at(3, 3));
        assert_eq!(client.state(&again), Some(RequestState::Resolved));
    }

    #[test]
    fn stale_answer_alone_does_not_settle_reused_id() {
        let (request_tx, request_rx) = unbounded();
        let (response_tx, response_rx) = unbounded();
        let mut client = DetectClient::connect(request_tx, response_rx);

        let abc = client.submit("abc", array_payload()).unwrap();
        assert!(client.wait(&abc, Duration::from_millis(10)).is_err());
        let stale = request_rx.try_recv().unwrap();
        client.submit("abc", array_payload()).unwrap();

        response_tx
            .send(DetectResponse {
                id: abc.clone(),
                ticket: stale.ticket,
                outcome: Err("stale".to_string()),
            })
            .unwrap();
        assert!(matches!(
            client.wait(&abc, Duration::from_millis(20)),
            Err(Error::Timeout { .. })
        ));
        assert_eq!(client.state(&abc), Some(RequestState::TimedOut));
    }

    #[test]
    fn error_response_rejects_request() {
        let (request_tx, request_rx) = unbounded();
        let (response_tx, response_rx) = unbounded();
        let mut client = DetectClient::connect(request_tx, response_rx);

        let id = client.submit("abc", array_payload()).unwrap();
        let ticket = request_rx.try_recv().unwrap().ticket;
        response_tx
            .send(DetectResponse {
                id: id.clone(),
                ticket,
                outcome: Err("boom".to_string()),
            })
            .unwrap();

        assert!(matches!(
            client.wait(&id, GENEROUS),
            Err(Error::Rejected { message, .. }) if message == "boom"
        ));
        assert_eq!(client.pending_count(), 0);
        assert_eq!(client.state(&id), Some(RequestState::Rejected));
    }

    #[test]
    fn vanished_worker_fails_pending_request() {
        let (request_tx, _request_rx) = unbounded();
        let (response_tx, response_rx) = unbounded::<DetectResponse>();
        let mut client = DetectClient::connect(request_tx, response_rx);

        let id = client.submit("abc", array_payload()).unwrap();
        drop(response_tx);
        assert!(matches!(
            client.wait(&id, GENEROUS),
            Err(Error::WorkerDisconnected)
        ));
        assert_eq!(client.pending_count(), 0);
        assert_eq!(client.state(&id), Some(RequestState::Rejected));
    }

    #[test]
    fn closed_request_channel_fails_submit() {
        let (request_tx, request_rx) = unbounded();
        let (_response_tx, response_rx) = unbounded();
        drop(request_rx);
        let mut client = DetectClient::connect(request_tx, response_rx);

        let payload = DetectPayload::Array {
            source: GrayBuffer::filled(4, 4, 0.0),
            template: GrayBuffer::filled(2, 2, 0.0),
            scale_to_full: 1.0,
        };
        assert!(matches!(
            client.submit("abc", payload),
            Err(Error::WorkerDisconnected)
        ));
        assert_eq!(client.pending_count(), 0);
        assert_eq!(client.state(&RequestId::from("abc")), None);
    }
}
