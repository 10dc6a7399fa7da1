use std::sync::mpsc::Sender;
use std::sync::Arc;
use tracing::debug;

use crate::gateway::{Gateway, GatewayError, QuestionsPayload, Submission};
use crate::runtime::ProctorEvent;
use crate::schedule::Schedule;

/// A single call to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Schedule,
    CheckSubmission { email: String, day: u8 },
    Questions { day: u8 },
    Submit(Box<Submission>),
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Schedule => "getSchedule",
            Request::CheckSubmission { .. } => "checkSubmission",
            Request::Questions { .. } => "getQuestions",
            Request::Submit(_) => "submit",
        }
    }
}

/// Outcome of a `Request`, delivered back to the loop as an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Schedule(Result<Schedule, GatewayError>),
    SubmissionCheck(Result<bool, GatewayError>),
    Questions(Result<QuestionsPayload, GatewayError>),
    Submitted(Result<(), GatewayError>),
}

/// Performs a request synchronously.
pub fn execute<G: Gateway + ?Sized>(gateway: &G, request: Request) -> Reply {
    match request {
        Request::Schedule => Reply::Schedule(gateway.schedule()),
        Request::CheckSubmission { email, day } => {
            Reply::SubmissionCheck(gateway.submission_exists(&email, day))
        }
        Request::Questions { day } => Reply::Questions(gateway.questions(day)),
        Request::Submit(sub) => Reply::Submitted(gateway.submit(&sub)),
    }
}

/// Hands requests off without waiting for them.
pub trait Dispatch {
    fn dispatch(&self, request: Request);
}

/// Runs every request on its own short-lived thread and posts the reply
/// into the event channel. Requests cannot be cancelled once issued.
#[derive(Clone)]
pub struct ThreadDispatch {
    gateway: Arc<dyn Gateway>,
    tx: Sender<ProctorEvent>,
}

impl ThreadDispatch {
    pub fn new(gateway: Arc<dyn Gateway>, tx: Sender<ProctorEvent>) -> Self {
        Self { gateway, tx }
    }
}

impl Dispatch for ThreadDispatch {
    fn dispatch(&self, request: Request) {
        let gateway = Arc::clone(&self.gateway);
        let tx = self.tx.clone();
        debug!(request = request.name(), "dispatching");
        std::thread::spawn(move || {
            let reply = execute(gateway.as_ref(), request);
            // the loop may already be gone on shutdown
            let _ = tx.send(ProctorEvent::Reply(reply));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryGateway;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn execute_maps_requests_to_replies() {
        let gw = MemoryGateway::new().with_questions(2, QuestionsPayload::default());
        assert_eq!(
            execute(&gw, Request::Questions { day: 2 }),
            Reply::Questions(Ok(QuestionsPayload::default()))
        );
        assert_eq!(
            execute(
                &gw,
                Request::CheckSubmission {
                    email: "a@b.co".into(),
                    day: 2
                }
            ),
            Reply::SubmissionCheck(Ok(false))
        );
    }

    #[test]
    fn thread_dispatch_posts_reply() {
        let (tx, rx) = mpsc::channel();
        let dispatch = ThreadDispatch::new(Arc::new(MemoryGateway::new()), tx);
        dispatch.dispatch(Request::Schedule);
        match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
            ProctorEvent::Reply(Reply::Schedule(Ok(s))) => assert_eq!(s, Schedule::default()),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
