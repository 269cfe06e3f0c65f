//! Publishes failed reconciliation passes as Kubernetes events on the cloud provider
//! configuration, so that `kubectl describe configmap` shows why it was not converged.

use std::{error::Error, fmt::Write};

use k8s_openapi::api::core::v1::ObjectReference;
use kube::{
    core::DynamicObject,
    runtime::{
        events::{Event, EventType, Recorder, Reporter},
        reflector::ObjectRef,
    },
};
use tracing::Instrument;

use super::controller::ReconcilerError;
use crate::client::Client;

/// Maximum length of an event note, in bytes.
const MAX_NOTE_LEN: usize = 1024;

const ELLIPSIS: char = '…';

/// Builds the Warning event describing `error`.
///
/// The note carries the whole error chain, joined with `: `.
fn reconcile_error_event<E: ReconcilerError>(error: &E) -> Event {
    let mut note = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        // Writing into a String never fails
        let _ = write!(note, ": {cause}");
        source = cause.source();
    }
    truncate_note(&mut note, MAX_NOTE_LEN);

    Event {
        type_: EventType::Warning,
        reason: error.category().to_owned(),
        note: Some(note),
        action: "Reconcile".to_owned(),
        secondary: error.secondary_object().map(ObjectReference::from),
    }
}

/// Shortens `note` to at most `max_len` bytes, marking the cut with an ellipsis.
fn truncate_note(note: &mut String, max_len: usize) {
    if note.len() <= max_len {
        return;
    }

    let budget = max_len.saturating_sub(ELLIPSIS.len_utf8());
    let cut = note
        .char_indices()
        .map(|(index, _)| index)
        .take_while(|index| *index <= budget)
        .last()
        .unwrap_or(0);
    note.truncate(cut);
    if ELLIPSIS.len_utf8() <= max_len {
        note.push(ELLIPSIS);
    }
}

/// Publishes `error` as a Warning event on `config_map` in the background.
#[tracing::instrument(skip(client, error))]
pub fn publish_reconcile_error<E: ReconcilerError>(
    client: &Client,
    controller_name: &str,
    error: &E,
    config_map: &ObjectRef<DynamicObject>,
) {
    let recorder = Recorder::new(
        client.as_kube_client(),
        Reporter {
            controller: controller_name.to_owned(),
            instance: None,
        },
    );
    let reference = ObjectReference::from(config_map.clone());
    let event = reconcile_error_event(error);

    tokio::spawn(
        async move {
            if let Err(error) = recorder.publish(&event, &reference).await {
                tracing::error!(
                    error = &error as &dyn Error,
                    "failed to publish reconcile error as event"
                );
            }
        }
        .in_current_span(),
    );
}
