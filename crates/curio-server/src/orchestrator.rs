use std::sync::Arc;

use curio_core::frames::SequencedFrame;
use curio_core::ids::{GenerationId, MessageId};
use curio_core::turns::TurnRole;
use curio_core::validate::TriggerParams;
use curio_engine::{PlanCache, ResearchRunner, RunRequest};
use curio_store::conversations::ConversationRepo;
use curio_store::frames::FrameRepo;
use curio_store::generations::GenerationRepo;
use curio_store::Database;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bridge::{BridgeContext, FrameBridge};
use crate::error::ApiError;

pub const FRAME_CHANNEL_CAPACITY: usize = 256;

/// A generation currently running in the background.
pub struct ActiveGeneration {
    pub cancel: CancellationToken,
    pub generation_id: GenerationId,
}

/// What the trigger endpoint hands back for polling and streaming.
#[derive(Debug)]
pub struct TriggerReceipt {
    pub generation_id: GenerationId,
    pub assistant_message_id: MessageId,
}

/// Starts generations and tracks the running ones.
///
/// Each start spawns a runner task and a bridge task joined together: the
/// runner produces frames into a bounded channel, the bridge persists them
/// and republishes to the generation's live broadcast. Both registries are
/// cleaned up when the pair finishes.
pub struct GenerationOrchestrator {
    runner: Arc<ResearchRunner>,
    plan_cache: Arc<PlanCache>,
    frames: Arc<FrameRepo>,
    db: Database,
    active: Arc<DashMap<MessageId, ActiveGeneration>>,
    live: Arc<DashMap<GenerationId, broadcast::Sender<SequencedFrame>>>,
}

impl GenerationOrchestrator {
    pub fn new(
        runner: Arc<ResearchRunner>,
        plan_cache: Arc<PlanCache>,
        frames: Arc<FrameRepo>,
        db: Database,
    ) -> Self {
        Self {
            runner,
            plan_cache,
            frames,
            db,
            active: Arc::new(DashMap::new()),
            live: Arc::new(DashMap::new()),
        }
    }

    /// Starts a generation for a fresh pair of message ids.
    pub async fn trigger(&self, params: TriggerParams) -> Result<TriggerReceipt, ApiError> {
        self.start(params, MessageId::new(), MessageId::new()).await
    }

    /// Double triggers racing past the registry check still fail at the
    /// store's one-active-generation-per-message constraint.
    pub(crate) async fn start(
        &self,
        params: TriggerParams,
        user_message_id: MessageId,
        assistant_message_id: MessageId,
    ) -> Result<TriggerReceipt, ApiError> {
        if self.active.contains_key(&assistant_message_id) {
            return Err(ApiError::Conflict(
                "a generation is already running for this message".into(),
            ));
        }

        let conversations = ConversationRepo::new(self.db.clone());
        let generations = GenerationRepo::new(self.db.clone());
        let generation = generations.create(&params.conversation_id, &assistant_message_id)?;
        conversations.append_turn(
            &params.conversation_id,
            &user_message_id,
            TurnRole::User,
            &params.message,
        )?;
        self.plan_cache.invalidate(&params.conversation_id);

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (live_tx, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        self.live.insert(generation.id.clone(), live_tx.clone());

        let cancel = CancellationToken::new();
        self.active.insert(
            assistant_message_id.clone(),
            ActiveGeneration {
                cancel: cancel.clone(),
                generation_id: generation.id.clone(),
            },
        );

        let bridge = FrameBridge::new(
            BridgeContext {
                generation_id: generation.id.clone(),
                conversation_id: params.conversation_id.clone(),
                assistant_message_id: assistant_message_id.clone(),
            },
            self.frames.clone(),
            GenerationRepo::new(self.db.clone()),
            ConversationRepo::new(self.db.clone()),
            live_tx,
        );

        let request = RunRequest {
            conversation_id: params.conversation_id,
            generation_id: generation.id.clone(),
            assistant_message_id: assistant_message_id.clone(),
            message: params.message,
            conversation_context: params.conversation_context,
            references: params.context_references,
        };

        let runner = self.runner.clone();
        let active = self.active.clone();
        let live = self.live.clone();
        let generation_id = generation.id.clone();
        let message_id = assistant_message_id.clone();
        let work = async move {
            tokio::join!(runner.run(request, cancel, frame_tx), bridge.run(frame_rx));
            active.remove(&message_id);
            live.remove(&generation_id);
        };

        info!(
            generation_id = %generation.id,
            conversation_id = %generation.conversation_id,
            "generation started"
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(work);
            }
            // No executor to hand the task to; finish it before replying.
            Err(_) => {
                warn!(generation_id = %generation.id, "no background executor, running generation inline");
                work.await;
            }
        }

        Ok(TriggerReceipt {
            generation_id: generation.id,
            assistant_message_id,
        })
    }

    /// Live frames for a running generation. `None` once it has finished;
    /// callers fall back to the persisted log.
    pub fn subscribe(&self, generation_id: &GenerationId) -> Option<broadcast::Receiver<SequencedFrame>> {
        self.live.get(generation_id).map(|tx| tx.subscribe())
    }

    pub fn is_running(&self, message_id: &MessageId) -> bool {
        self.active.contains_key(message_id)
    }

    /// Cancels every active generation. Each runner winds down through its
    /// own error frame, so registries are left for the tasks to clean up.
    pub fn abort_all(&self) -> usize {
        let count = self.active.len();
        for entry in self.active.iter() {
            entry.value().cancel.cancel();
        }
        count
    }
}
