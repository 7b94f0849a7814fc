use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use personas::Persona;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use crate::content::{Content, FunctionCall, Part, Role};
use crate::error::RuntimeError;
use crate::event::AgentEvent;
use crate::model::{GenerateRequest, GenerativeModel, RunConfig};
use crate::queue::{LiveRequestQueue, LiveRequestReceiver};
use crate::session::{Session, SessionService};
use crate::DEFAULT_MAX_MODEL_ROUNDS;

pub type EventStream = BoxStream<'static, Result<AgentEvent, RuntimeError>>;

type EventSender = mpsc::UnboundedSender<Result<AgentEvent, RuntimeError>>;

/// Handles of one live session: push user content into `requests`, read the
/// agent's events from `events`.
pub struct LiveSession {
    pub session_id: String,
    /// Token identifying this session's runtime state; hand it back to
    /// [`AgentRuntime::end_session`].
    pub generation: u64,
    pub requests: LiveRequestQueue,
    pub events: EventStream,
}

impl std::fmt::Debug for LiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSession")
            .field("session_id", &self.session_id)
            .field("generation", &self.generation)
            .field("requests", &self.requests)
            .finish_non_exhaustive()
    }
}

/// Seam between the relay and whatever drives the agents.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn start_session(&self, session_id: &str) -> Result<LiveSession, RuntimeError>;

    /// Releases runtime-side state for a session, but only if `generation`
    /// still names the current one. Unknown ids and stale generations are
    /// ignored.
    async fn end_session(&self, session_id: &str, generation: u64);
}

pub struct RunnerBuilder {
    app_name: String,
    root: Arc<Persona>,
    model: Arc<dyn GenerativeModel>,
    sessions: Option<SessionService>,
    run_config: RunConfig,
    max_rounds: usize,
}

impl RunnerBuilder {
    pub fn with_session_service(mut self, sessions: SessionService) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn with_run_config(mut self, run_config: RunConfig) -> Self {
        self.run_config = run_config;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    pub fn build(self) -> Runner {
        Runner {
            inner: Arc::new(RunnerInner {
                app_name: self.app_name,
                root: self.root,
                model: self.model,
                sessions: self.sessions.unwrap_or_default(),
                run_config: self.run_config,
                max_rounds: self.max_rounds,
            }),
        }
    }
}

/// Drives a persona tree against a [`GenerativeModel`], one driver task per
/// live session.
#[derive(Clone)]
pub struct Runner {
    inner: Arc<RunnerInner>,
}

struct RunnerInner {
    app_name: String,
    root: Arc<Persona>,
    model: Arc<dyn GenerativeModel>,
    sessions: SessionService,
    run_config: RunConfig,
    max_rounds: usize,
}

impl Runner {
    pub fn builder(
        app_name: impl Into<String>,
        root: Arc<Persona>,
        model: Arc<dyn GenerativeModel>,
    ) -> RunnerBuilder {
        RunnerBuilder {
            app_name: app_name.into(),
            root,
            model,
            sessions: None,
            run_config: RunConfig::default(),
            max_rounds: DEFAULT_MAX_MODEL_ROUNDS,
        }
    }

    pub fn app_name(&self) -> &str {
        &self.inner.app_name
    }

    pub fn root(&self) -> &Arc<Persona> {
        &self.inner.root
    }

    pub fn sessions(&self) -> &SessionService {
        &self.inner.sessions
    }

    /// Starts the driver for `session` and returns its event stream.
    pub fn run_live(&self, session: Session, requests: LiveRequestReceiver) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.drive(session, requests, tx).await });
        UnboundedReceiverStream::new(rx).boxed()
    }
}

#[async_trait]
impl AgentRuntime for Runner {
    async fn start_session(&self, session_id: &str) -> Result<LiveSession, RuntimeError> {
        let session = self
            .inner
            .sessions
            .create_session(&self.inner.app_name, session_id, session_id)
            .await;
        let generation = session.generation;
        let (requests, receiver) = LiveRequestQueue::new();
        let events = self.run_live(session, receiver);
        info!(session_id, generation, root = self.inner.root.name(), "live session started");
        Ok(LiveSession {
            session_id: session_id.to_string(),
            generation,
            requests,
            events,
        })
    }

    async fn end_session(&self, session_id: &str, generation: u64) {
        if self.inner.sessions.delete_session_if(session_id, generation).await {
            debug!(session_id, generation, "session state released");
        }
    }
}

impl RunnerInner {
    async fn drive(
        self: Arc<Self>,
        session: Session,
        mut requests: LiveRequestReceiver,
        events: EventSender,
    ) {
        let author = self.root.name().to_string();
        let mut next = next_request(&mut requests, &events).await;

        while let Some(content) = next.take() {
            session.append(content).await;
            let history = session.history().await;
            let mut turn = self.run_turn(Arc::clone(&self.root), history, Some(events.clone()));

            tokio::select! {
                biased;
                result = &mut turn => match result {
                    Ok(produced) => {
                        session.extend(produced).await;
                        if events.send(Ok(AgentEvent::turn_complete(&author))).is_err() {
                            break;
                        }
                        next = next_request(&mut requests, &events).await;
                    }
                    Err(RuntimeError::EventsClosed) => break,
                    Err(err) => {
                        warn!(session_id = %session.id, error = %err, "turn failed");
                        let _ = events.send(Err(err));
                        break;
                    }
                },
                incoming = requests.recv() => match incoming {
                    Some(content) => {
                        debug!(session_id = %session.id, "turn interrupted by new input");
                        if events.send(Ok(AgentEvent::interrupted(&author))).is_err() {
                            break;
                        }
                        next = Some(content);
                    }
                    None => break,
                },
                _ = events.closed() => break,
            }
        }
        debug!(session_id = %session.id, "session driver finished");
    }

    /// Runs `persona` until it answers without calling a tool. Returns the
    /// contents produced during the turn. Text is streamed to `events` when
    /// given.
    fn run_turn(
        self: &Arc<Self>,
        persona: Arc<Persona>,
        mut contents: Vec<Content>,
        events: Option<EventSender>,
    ) -> BoxFuture<'static, Result<Vec<Content>, RuntimeError>> {
        let inner = Arc::clone(self);
        async move {
            let start = contents.len();
            for round in 0..inner.max_rounds {
                debug!(persona = persona.name(), round, "model round");
                let request =
                    GenerateRequest::for_persona(&persona, contents.clone(), &inner.run_config);
                let mut stream = inner.model.stream_generate(request).await?;

                let mut reply = Content::new(Role::Model, Vec::new());
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk?;
                    if let Some(events) = &events {
                        let texts = chunk
                            .parts
                            .iter()
                            .filter_map(|part| part.text.as_deref())
                            .filter(|text| !text.is_empty());
                        for text in texts {
                            events
                                .send(Ok(AgentEvent::text(persona.name(), text)))
                                .map_err(|_| RuntimeError::EventsClosed)?;
                        }
                    }
                    reply.merge(chunk);
                }

                let calls: Vec<FunctionCall> = reply.function_calls().cloned().collect();
                if !reply.is_empty() {
                    contents.push(reply);
                }
                if calls.is_empty() {
                    return Ok(contents.split_off(start));
                }

                let mut responses = Vec::with_capacity(calls.len());
                for call in calls {
                    responses.push(inner.call_tool(&persona, call).await?);
                }
                contents.push(Content::new(Role::User, responses));
            }
            Err(RuntimeError::TooManyRounds(inner.max_rounds))
        }
        .boxed()
    }

    async fn call_tool(self: &Arc<Self>, persona: &Persona, call: FunctionCall) -> Result<Part, RuntimeError> {
        let delegate = persona
            .agent_tool(&call.name)
            .or_else(|| persona.sub_agents().iter().find(|sub| sub.name() == call.name))
            .cloned();
        let Some(delegate) = delegate else {
            warn!(persona = persona.name(), tool = %call.name, "model called an unknown tool");
            let error = format!("unknown tool `{}`", call.name);
            return Ok(Part::function_response(call.name, json!({ "error": error })));
        };

        let request = match call.args.get("request").and_then(Value::as_str) {
            Some(request) => request.to_string(),
            None => call.args.to_string(),
        };
        debug!(from = persona.name(), to = delegate.name(), "delegating");

        let produced = self
            .run_turn(delegate, vec![Content::user_text(request)], None)
            .await?;
        let answer = produced
            .iter()
            .rev()
            .map(Content::text)
            .find(|text| !text.is_empty())
            .unwrap_or_default();
        Ok(Part::function_response(call.name, json!({ "result": answer })))
    }
}

/// Waits for the next user content. `None` once the queue is closed or nobody
/// is listening for events anymore.
async fn next_request(requests: &mut LiveRequestReceiver, events: &EventSender) -> Option<Content> {
    tokio::select! {
        content = requests.recv() => content,
        _ = events.closed() => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::model::ModelStream;
    use futures::stream;
    use personas::default_registry;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::timeout;

    enum Step {
        Chunks(Vec<Content>),
        Hang,
        Fail,
    }

    struct ScriptedModel {
        steps: Mutex<VecDeque<Step>>,
        requests: Mutex<Vec<GenerateRequest>>,
    }

    impl ScriptedModel {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<GenerateRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GenerativeModel for ScriptedModel {
        async fn stream_generate(&self, request: GenerateRequest) -> Result<ModelStream, ModelError> {
            self.requests.lock().unwrap().push(request);
            let step = self
                .steps
                .lock()
                .unwrap()
                .pop_front()
                .expect("scripted model ran out of steps");
            match step {
                Step::Chunks(chunks) => Ok(stream::iter(chunks.into_iter().map(Ok)).boxed()),
                Step::Hang => Ok(stream::pending().boxed()),
                Step::Fail => Err(ModelError::Http {
                    status: 500,
                    body: "boom".into(),
                }),
            }
        }
    }

    fn call(name: &str, request: &str) -> Content {
        Content::new(
            Role::Model,
            vec![Part::function_call(name, json!({ "request": request }))],
        )
    }

    fn runner(model: Arc<ScriptedModel>) -> Runner {
        let registry = default_registry().unwrap();
        Runner::builder("test app", registry.root().clone(), model).build()
    }

    async fn next_event(session: &mut LiveSession) -> AgentEvent {
        timeout(Duration::from_secs(2), session.events.next())
            .await
            .expect("timed out waiting for event")
            .expect("event stream ended")
            .expect("runtime error")
    }

    #[tokio::test]
    async fn streams_text_then_turn_complete() {
        let model = ScriptedModel::new(vec![Step::Chunks(vec![
            Content::model_text("Par"),
            Content::model_text("is"),
        ])]);
        let runner = runner(model.clone());
        let mut session = runner.start_session("s1").await.unwrap();

        session
            .requests
            .send_content(Content::user_text("capital of France?"))
            .unwrap();

        let first = next_event(&mut session).await;
        assert_eq!(first.first_text(), Some("Par"));
        assert!(first.partial);
        assert_eq!(first.author, "search_support_agent");
        assert_eq!(next_event(&mut session).await.first_text(), Some("is"));
        assert!(next_event(&mut session).await.turn_complete);

        let stored = runner.sessions().get_session("s1").await.unwrap();
        let history = stored.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].text(), "Paris");
        assert_eq!(model.requests()[0].contents.len(), 1);
    }

    #[tokio::test]
    async fn delegates_through_agent_tools() {
        let model = ScriptedModel::new(vec![
            Step::Chunks(vec![call("reasoning_agent", "why is the sky blue")]),
            Step::Chunks(vec![call("search_agent", "rayleigh scattering")]),
            Step::Chunks(vec![Content::model_text("Rayleigh scattering of sunlight")]),
            Step::Chunks(vec![Content::model_text("Short wavelengths scatter more.")]),
            Step::Chunks(vec![Content::model_text("Blue light scatters the most.")]),
        ]);
        let runner = runner(model.clone());
        let mut session = runner.start_session("s1").await.unwrap();
        session
            .requests
            .send_content(Content::user_text("why is the sky blue?"))
            .unwrap();

        assert_eq!(
            next_event(&mut session).await.first_text(),
            Some("Blue light scatters the most.")
        );
        assert!(next_event(&mut session).await.turn_complete);

        let registry = default_registry().unwrap();
        let requests = model.requests();
        assert_eq!(requests.len(), 5);
        assert_eq!(requests[1].model, registry.get("reasoning_agent").unwrap().model());
        assert_eq!(requests[1].contents[0].first_text(), Some("why is the sky blue"));
        assert_eq!(requests[2].model, registry.get("search_agent").unwrap().model());

        let feedback = requests[4].contents.last().unwrap();
        assert_eq!(feedback.role, Role::User);
        let response = feedback.parts[0].function_response.as_ref().unwrap();
        assert_eq!(response.name, "reasoning_agent");
        assert_eq!(response.response["result"], "Short wavelengths scatter more.");
    }

    #[tokio::test]
    async fn unknown_tool_gets_error_response() {
        let model = ScriptedModel::new(vec![
            Step::Chunks(vec![call("weather_agent", "tomorrow")]),
            Step::Chunks(vec![Content::model_text("I cannot check the weather.")]),
        ]);
        let runner = runner(model.clone());
        let mut session = runner.start_session("s1").await.unwrap();
        session.requests.send_content(Content::user_text("weather?")).unwrap();

        assert!(next_event(&mut session).await.first_text().is_some());
        assert!(next_event(&mut session).await.turn_complete);

        let feedback = model.requests()[1].contents.last().cloned().unwrap();
        let response = feedback.parts[0].function_response.clone().unwrap();
        assert!(response.response["error"]
            .as_str()
            .unwrap()
            .contains("unknown tool"));
    }

    #[tokio::test]
    async fn new_input_interrupts_running_turn() {
        let model = ScriptedModel::new(vec![
            Step::Hang,
            Step::Chunks(vec![Content::model_text("second answer")]),
        ]);
        let runner = runner(model.clone());
        let mut session = runner.start_session("s1").await.unwrap();

        session.requests.send_content(Content::user_text("first")).unwrap();
        timeout(Duration::from_secs(2), async {
            while model.requests().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        session.requests.send_content(Content::user_text("second")).unwrap();

        assert!(next_event(&mut session).await.interrupted);
        assert_eq!(next_event(&mut session).await.first_text(), Some("second answer"));
        assert!(next_event(&mut session).await.turn_complete);

        let contents = &model.requests()[1].contents;
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[1].first_text(), Some("second"));
    }

    #[tokio::test]
    async fn model_failure_ends_stream_with_error() {
        let runner = runner(ScriptedModel::new(vec![Step::Fail]));
        let mut session = runner.start_session("s1").await.unwrap();
        session.requests.send_content(Content::user_text("hi")).unwrap();

        let item = timeout(Duration::from_secs(2), session.events.next())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(item, Err(RuntimeError::Model(ModelError::Http { status: 500, .. }))));
        assert!(timeout(Duration::from_secs(2), session.events.next())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn runaway_tool_loop_is_bounded() {
        let model = ScriptedModel::new(vec![
            Step::Chunks(vec![call("nope", "a")]),
            Step::Chunks(vec![call("nope", "b")]),
        ]);
        let registry = default_registry().unwrap();
        let runner = Runner::builder("test app", registry.root().clone(), model)
            .with_max_rounds(2)
            .build();
        let mut session = runner.start_session("s1").await.unwrap();
        session.requests.send_content(Content::user_text("loop")).unwrap();

        let item = timeout(Duration::from_secs(2), session.events.next())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(item, Err(RuntimeError::TooManyRounds(2))));
    }

    #[tokio::test]
    async fn closing_queue_ends_stream_and_end_session_releases_state() {
        let runner = runner(ScriptedModel::new(Vec::new()));
        let mut session = runner.start_session("s1").await.unwrap();
        assert_eq!(runner.sessions().len().await, 1);

        assert!(session.requests.close());
        assert!(timeout(Duration::from_secs(2), session.events.next())
            .await
            .unwrap()
            .is_none());

        runner.end_session("s1", session.generation).await;
        assert!(runner.sessions().get_session("s1").await.is_none());
        runner.end_session("s1", session.generation).await;
    }

    #[tokio::test]
    async fn stale_end_session_keeps_newer_state() {
        let model = ScriptedModel::new(vec![Step::Chunks(vec![Content::model_text("still here")])]);
        let runner = runner(model);
        let old = runner.start_session("s1").await.unwrap();
        let mut new = runner.start_session("s1").await.unwrap();
        assert_ne!(old.generation, new.generation);

        // The first socket tears down after the second one took the id over.
        old.requests.close();
        drop(old.events);
        runner.end_session("s1", old.generation).await;

        let stored = runner.sessions().get_session("s1").await.unwrap();
        assert_eq!(stored.generation, new.generation);

        new.requests.send_content(Content::user_text("hello")).unwrap();
        assert_eq!(next_event(&mut new).await.first_text(), Some("still here"));
        assert!(next_event(&mut new).await.turn_complete);
        assert_eq!(runner.sessions().get_session("s1").await.unwrap().history().await.len(), 2);

        runner.end_session("s1", new.generation).await;
        assert!(runner.sessions().get_session("s1").await.is_none());
    }
}
