//! The administrative gRPC surface: pause/resume/unblock a
//! peer, trigger a settlement out of band, and rotate a signing key.
//!
//! Every RPC is gated by [`BearerAuthInterceptor`], a constant-time
//! comparison against a configured shared secret rather than a standard
//! `==`, to avoid leaking timing information about the secret; there is no
//! issuer to verify against, so this is a static bearer token rather than a
//! JWT.

use std::sync::Arc;

use subtle::ConstantTimeEq;
use time::format_description::well_known::Rfc3339;
use tonic::{Request, Response, Status};

use conduit_keys::KeyRotationManager;
use conduit_ledger::{AccountManager, SettlementMonitor};
use conduit_primitives::{Amount, PeerId, TokenId};
use conduit_trust::{FraudDetector, RateLimiter};

use crate::proto::admin_service_server::AdminService;
use crate::proto::{
    PausePeerRequest, PausePeerResponse, ResumePeerRequest, ResumePeerResponse,
    RotateKeyRequest, RotateKeyResponse, TriggerSettlementRequest, TriggerSettlementResponse,
    UnblockPeerRequest, UnblockPeerResponse,
};

/// Checks the `authorization` metadata entry against a shared secret,
/// expecting the conventional `Bearer <secret>` form.
///
/// Missing/malformed headers map to `Unauthenticated`; a well-formed header
/// carrying the wrong secret maps to `PermissionDenied`, following the
/// usual HTTP convention of "who are you" vs. "I know who you are and the
/// answer is no".
#[derive(Clone)]
pub struct BearerAuthInterceptor {
    secret: Arc<str>,
}

impl BearerAuthInterceptor {
    pub fn new(secret: impl Into<Arc<str>>) -> Self {
        Self { secret: secret.into() }
    }
}

impl tonic::service::Interceptor for BearerAuthInterceptor {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        let header = request
            .metadata()
            .get("authorization")
            .ok_or_else(|| Status::unauthenticated("missing authorization metadata"))?
            .to_str()
            .map_err(|_| Status::unauthenticated("authorization metadata is not valid ASCII"))?;

        let presented = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| Status::unauthenticated("authorization must be a bearer token"))?;

        if bool::from(presented.as_bytes().ct_eq(self.secret.as_bytes())) {
            Ok(request)
        } else {
            Err(Status::permission_denied("invalid bearer token"))
        }
    }
}

/// Backs the `AdminService` RPCs with the live components they control.
/// Deliberately holds handles to individual components rather than the
/// whole [`crate::Orchestrator`], so the admin surface can only reach the
/// operations the protocol actually exposes.
pub struct AdminServiceImpl {
    rate_limiter: Arc<RateLimiter>,
    fraud_detector: Arc<FraudDetector>,
    accounts: Arc<AccountManager>,
    settlement_monitor: Arc<SettlementMonitor>,
    key_rotation: Arc<KeyRotationManager>,
}

impl AdminServiceImpl {
    pub fn new(
        rate_limiter: Arc<RateLimiter>,
        fraud_detector: Arc<FraudDetector>,
        accounts: Arc<AccountManager>,
        settlement_monitor: Arc<SettlementMonitor>,
        key_rotation: Arc<KeyRotationManager>,
    ) -> Self {
        Self {
            rate_limiter,
            fraud_detector,
            accounts,
            settlement_monitor,
            key_rotation,
        }
    }
}

#[tonic::async_trait]
impl AdminService for AdminServiceImpl {
    async fn pause_peer(
        &self,
        request: Request<PausePeerRequest>,
    ) -> Result<Response<PausePeerResponse>, Status> {
        let req = request.into_inner();
        self.fraud_detector.pause_peer(
            PeerId::from(req.peer_id.as_str()),
            req.reason,
            "admin.manual_pause",
            conduit_trust::fraud::Severity::Medium,
        );
        Ok(Response::new(PausePeerResponse {}))
    }

    async fn resume_peer(
        &self,
        request: Request<ResumePeerRequest>,
    ) -> Result<Response<ResumePeerResponse>, Status> {
        let req = request.into_inner();
        self.fraud_detector.resume_peer(&PeerId::from(req.peer_id.as_str()));
        Ok(Response::new(ResumePeerResponse {}))
    }

    async fn unblock_peer(
        &self,
        request: Request<UnblockPeerRequest>,
    ) -> Result<Response<UnblockPeerResponse>, Status> {
        let req = request.into_inner();
        self.rate_limiter.unblock(&PeerId::from(req.peer_id.as_str()));
        Ok(Response::new(UnblockPeerResponse {}))
    }

    async fn trigger_settlement(
        &self,
        request: Request<TriggerSettlementRequest>,
    ) -> Result<Response<TriggerSettlementResponse>, Status> {
        let req = request.into_inner();
        let amount: Amount = req
            .amount
            .parse()
            .map_err(|_| Status::invalid_argument("amount must be a non-negative decimal integer"))?;

        let peer = PeerId::from(req.peer_id.as_str());
        let token = TokenId::from(req.token_id.as_str());

        self.settlement_monitor.mark_settlement_in_progress(&peer, &token);
        let result = self.accounts.record_settlement(&peer, &token, amount).await;
        self.settlement_monitor.mark_settlement_completed(&peer, &token);

        result
            .map(|_| Response::new(TriggerSettlementResponse {}))
            .map_err(|e| Status::internal(e.to_string()))
    }

    async fn rotate_key(
        &self,
        request: Request<RotateKeyRequest>,
    ) -> Result<Response<RotateKeyResponse>, Status> {
        let req = request.into_inner();
        let metadata = self
            .key_rotation
            .rotate_key(&req.old_key_id)
            .await
            .map_err(|e| Status::internal(e.to_string()))?;

        Ok(Response::new(RotateKeyResponse {
            new_key_id: metadata.new_key_id,
            rotation_date: metadata
                .rotation_date
                .format(&Rfc3339)
                .map_err(|e| Status::internal(e.to_string()))?,
            overlap_ends_at: metadata
                .overlap_ends_at
                .format(&Rfc3339)
                .map_err(|e| Status::internal(e.to_string()))?,
        }))
    }
}
