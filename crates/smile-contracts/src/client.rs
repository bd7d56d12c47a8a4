use crate::envelope::{TransformRequest, TransformResponse};

/// One synchronous call to the transform relay.
///
/// Implementations never return an error: transport faults are folded into
/// `TransformResponse::Failure` so the controller only sees the three
/// envelope shapes.
pub trait RelayClient {
    fn transform(&self, request: &TransformRequest) -> TransformResponse;
}

impl<F> RelayClient for F
where
    F: Fn(&TransformRequest) -> TransformResponse,
{
    fn transform(&self, request: &TransformRequest) -> TransformResponse {
        self(request)
    }
}
