use std::sync::Arc;

use chrono::{DateTime, Utc};
use pbjson_types::Timestamp;
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status};

use crate::domain::{self, CreateInteraction, LikeAction, UserId};
use crate::services::{InteractionOrchestrator, Warning};

// Generated protobuf code (from backend/proto/services_v2/interaction_service.proto)
pub mod proto {
    tonic::include_proto!("nova.interaction_service.v2");
}

use proto::interaction_service_server::InteractionService;
use proto::{
    CreateInteractionRequest, CreateInteractionResponse, DeleteInteractionRequest,
    DeleteInteractionResponse, GetVideoCountersRequest, GetVideoCountersResponse,
    LikeActionRequest, LikeActionResponse, LikeActionType, ListInteractionsRequest,
    ListInteractionsResponse,
};

/// Metadata entry carrying the authenticated caller, set by the gateway
pub const USER_ID_METADATA: &str = "x-user-id";

pub struct InteractionServiceImpl {
    orchestrator: Arc<InteractionOrchestrator>,
}

impl InteractionServiceImpl {
    pub fn new(orchestrator: Arc<InteractionOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[tonic::async_trait]
impl InteractionService for InteractionServiceImpl {
    async fn create_interaction(
        &self,
        request: Request<CreateInteractionRequest>,
    ) -> Result<Response<CreateInteractionResponse>, Status> {
        let actor = actor_from(request.metadata())?;
        let req = request.into_inner();
        let kind = kind_from_proto(req.kind)?;

        let outcome = self
            .orchestrator
            .create_interaction(
                actor,
                CreateInteraction {
                    video_id: req.video_id,
                    kind,
                    content: req.content,
                },
            )
            .await?;

        Ok(Response::new(CreateInteractionResponse {
            interaction: Some(to_proto_interaction(outcome.record)),
            warnings: warnings_to_proto(&outcome.warnings),
        }))
    }

    async fn delete_interaction(
        &self,
        request: Request<DeleteInteractionRequest>,
    ) -> Result<Response<DeleteInteractionResponse>, Status> {
        let actor = actor_from(request.metadata())?;
        let req = request.into_inner();

        let outcome = self
            .orchestrator
            .delete_interaction(actor, &req.interaction_id)
            .await?;

        Ok(Response::new(DeleteInteractionResponse {
            interaction: Some(to_proto_interaction(outcome.record)),
            warnings: warnings_to_proto(&outcome.warnings),
        }))
    }

    async fn like_action(
        &self,
        request: Request<LikeActionRequest>,
    ) -> Result<Response<LikeActionResponse>, Status> {
        let actor = actor_from(request.metadata())?;
        let req = request.into_inner();

        let action = match LikeActionType::try_from(req.action) {
            Ok(LikeActionType::Like) => LikeAction::Like,
            Ok(LikeActionType::Unlike) => LikeAction::Unlike,
            _ => {
                return Err(Status::invalid_argument(format!(
                    "invalid like action: {}",
                    req.action
                )))
            }
        };

        let outcome = self
            .orchestrator
            .like_action(actor, req.video_id, action)
            .await?;

        Ok(Response::new(LikeActionResponse {
            interaction: outcome.record.map(to_proto_interaction),
            warnings: warnings_to_proto(&outcome.warnings),
        }))
    }

    async fn list_interactions(
        &self,
        request: Request<ListInteractionsRequest>,
    ) -> Result<Response<ListInteractionsResponse>, Status> {
        let req = request.into_inner();
        let kind = kind_from_proto(req.kind)?;

        let records = self
            .orchestrator
            .list_interactions(req.video_id, kind)
            .await?;

        Ok(Response::new(ListInteractionsResponse {
            interactions: records.into_iter().map(to_proto_interaction).collect(),
        }))
    }

    async fn get_video_counters(
        &self,
        request: Request<GetVideoCountersRequest>,
    ) -> Result<Response<GetVideoCountersResponse>, Status> {
        let req = request.into_inner();
        let counters = self.orchestrator.video_counters(req.video_id).await?;

        Ok(Response::new(GetVideoCountersResponse {
            video_id: counters.video_id,
            like_count: counters.like_count,
            comment_count: counters.comment_count,
        }))
    }
}

/// Authenticated caller from request metadata
pub fn actor_from(metadata: &MetadataMap) -> Result<UserId, Status> {
    let raw = metadata
        .get(USER_ID_METADATA)
        .ok_or_else(|| Status::unauthenticated("missing x-user-id"))?
        .to_str()
        .map_err(|_| Status::unauthenticated("malformed x-user-id"))?;

    match raw.trim().parse::<UserId>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(Status::unauthenticated("malformed x-user-id")),
    }
}

fn kind_from_proto(raw: i32) -> Result<domain::InteractionKind, Status> {
    match proto::InteractionKind::try_from(raw) {
        Ok(proto::InteractionKind::Comment) => Ok(domain::InteractionKind::Comment),
        Ok(proto::InteractionKind::Like) => Ok(domain::InteractionKind::Like),
        _ => Err(Status::invalid_argument(format!(
            "invalid interaction kind: {}",
            raw
        ))),
    }
}

fn kind_to_proto(kind: domain::InteractionKind) -> proto::InteractionKind {
    match kind {
        domain::InteractionKind::Comment => proto::InteractionKind::Comment,
        domain::InteractionKind::Like => proto::InteractionKind::Like,
    }
}

fn to_ts(dt: DateTime<Utc>) -> Option<Timestamp> {
    Some(Timestamp {
        seconds: dt.timestamp(),
        nanos: dt.timestamp_subsec_nanos() as i32,
    })
}

fn to_proto_interaction(record: domain::Interaction) -> proto::Interaction {
    proto::Interaction {
        id: record.id.to_string(),
        video_id: record.video_id,
        user_id: record.user_id,
        kind: kind_to_proto(record.kind) as i32,
        content: record.content.unwrap_or_default(),
        created_at: to_ts(record.created_at),
    }
}

fn warnings_to_proto(warnings: &[Warning]) -> Vec<String> {
    warnings.iter().map(ToString::to_string).collect()
}
