use serde::Deserialize;
use utoipa::IntoParams;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub(crate) struct SubscribeParams {
    /// Resumption token for clients that cannot set the `Last-Event-ID` header.
    pub(crate) last_event_id: Option<String>,
}
