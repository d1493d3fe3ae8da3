use std::sync::Arc;

use curio_core::frames::{SequencedFrame, StreamFrame};
use curio_core::ids::{ConversationId, GenerationId, MessageId};
use curio_core::session::GenerationState;
use curio_core::turns::TurnRole;
use curio_store::conversations::ConversationRepo;
use curio_store::frames::FrameRepo;
use curio_store::generations::GenerationRepo;
use curio_store::StoreError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, warn};

/// Identity of the generation a bridge serves.
#[derive(Clone)]
pub struct BridgeContext {
    pub generation_id: GenerationId,
    pub conversation_id: ConversationId,
    pub assistant_message_id: MessageId,
}

/// Single consumer of a generation's frame channel.
///
/// The bridge owns all persistence that follows from frames: the ordered
/// frame log, generation state and content columns, and the assistant turn
/// recorded on completion. The producer only ever sees an mpsc sender, so
/// ordering is the channel's ordering and sequence numbers are assigned
/// exactly once, at append time. Live subscribers get each frame after it
/// has been persisted, which is what lets a dropped stream resume from the
/// log without gaps.
pub struct FrameBridge {
    ctx: BridgeContext,
    frames: Arc<FrameRepo>,
    generations: GenerationRepo,
    conversations: ConversationRepo,
    live: broadcast::Sender<SequencedFrame>,
}

impl FrameBridge {
    pub fn new(
        ctx: BridgeContext,
        frames: Arc<FrameRepo>,
        generations: GenerationRepo,
        conversations: ConversationRepo,
        live: broadcast::Sender<SequencedFrame>,
    ) -> Self {
        Self {
            ctx,
            frames,
            generations,
            conversations,
            live,
        }
    }

    /// Drains the channel until the producer hangs up. Frames arriving after
    /// a terminal one are dropped by the log and never reach subscribers.
    pub async fn run(self, mut rx: mpsc::Receiver<StreamFrame>) {
        while let Some(frame) = rx.recv().await {
            match self.frames.append(&self.ctx.generation_id, &frame) {
                Ok(Some(row)) => {
                    self.apply(&frame);
                    let _ = self.live.send(row.sequenced());
                }
                Ok(None) => {}
                Err(err) => {
                    error!(
                        generation_id = %self.ctx.generation_id,
                        frame_type = frame.frame_type(),
                        error = %err,
                        "failed to persist frame"
                    );
                }
            }
        }
        debug!(generation_id = %self.ctx.generation_id, "frame channel closed");
    }

    fn apply(&self, frame: &StreamFrame) {
        let result = match frame {
            StreamFrame::Progress { stage, .. } => {
                self.generations.set_state(&self.ctx.generation_id, (*stage).into())
            }
            StreamFrame::Reasoning { content } => {
                self.generations.append_thinking(&self.ctx.generation_id, content)
            }
            StreamFrame::Content { delta: Some(delta), .. } => {
                self.generations.append_content(&self.ctx.generation_id, delta)
            }
            StreamFrame::Content { content: Some(content), .. } => {
                self.generations.set_content(&self.ctx.generation_id, content)
            }
            StreamFrame::Content { .. } | StreamFrame::ToolResult { .. } | StreamFrame::Metadata { .. } => Ok(()),
            StreamFrame::Error { .. } => {
                self.generations.set_state(&self.ctx.generation_id, GenerationState::Error)
            }
            StreamFrame::Complete { message_id, content, .. } => self.complete(message_id, content),
        };
        if let Err(err) = result {
            warn!(
                generation_id = %self.ctx.generation_id,
                frame_type = frame.frame_type(),
                error = %err,
                "frame side effect failed"
            );
        }
    }

    fn complete(&self, message_id: &MessageId, content: &str) -> Result<(), StoreError> {
        self.generations.set_content(&self.ctx.generation_id, content)?;
        match self.conversations.append_turn(
            &self.ctx.conversation_id,
            message_id,
            TurnRole::Assistant,
            content,
        ) {
            Ok(_) => {}
            // Redelivery of the same completion; the turn is already there.
            Err(StoreError::Conflict(_)) => {
                debug!(message_id = %message_id, "assistant turn already recorded");
            }
            Err(err) => return Err(err),
        }
        self.generations.set_state(&self.ctx.generation_id, GenerationState::Done)
    }
}
