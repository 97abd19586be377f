//! Redis Streams-backed event bus (durable, at-least-once delivery).
//!
//! - **Publish**: an optional dedup claim (`SET <dedup-key> 1 NX PX <window>`)
//!   followed by `XADD`. A dedup id seen inside the window is dropped silently.
//! - **Subscribe**: consumer-group reads (`XREADGROUP`). Each entry is handed to
//!   the subscription and `XACK`ed only after the consumer settles it as done.
//! - **Redelivery**: a consumer first drains its own pending entries (read from
//!   id `0`) before asking for new ones. That happens at startup, after every
//!   reconnect, and a while after an entry was settled as failed, so entries
//!   never acknowledged are picked up again under the same consumer name.
//!
//! ## Entry layout
//!
//! | field        | content                                    |
//! |--------------|--------------------------------------------|
//! | `message_id` | publisher-assigned id                      |
//! | `group_id`   | ordering group (optional)                  |
//! | `dedup_id`   | dedup id (optional)                        |
//! | `operation`  | operation attribute, flattened for tooling |
//! | `attributes` | JSON map name → `{data_type, value}`       |
//! | `body`       | message body                               |

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, instrument, warn};

use authors_events::{BusMessage, EventBus, MessageAttribute, OPERATION_ATTRIBUTE, Settlement, Subscription};

const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(300);
const READ_COUNT: usize = 16;
const BLOCK_MS: u64 = 1_000;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);
const REDELIVERY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum RedisStreamsError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

#[derive(Debug, Clone)]
pub struct RedisStreamsEventBus {
    client: Arc<redis::Client>,
    stream_key: String,
    consumer_group: String,
    consumer_name: String,
    dedup_window: Duration,
}

impl RedisStreamsEventBus {
    /// Create a bus over `stream_key`.
    ///
    /// `consumer_group` is used by [`EventBus::subscribe`]; publishers never
    /// touch it.
    pub fn new(
        redis_url: impl AsRef<str>,
        stream_key: impl Into<String>,
        consumer_group: impl Into<String>,
    ) -> Result<Self, RedisStreamsError> {
        let client =
            redis::Client::open(redis_url.as_ref()).map_err(|e| RedisStreamsError::Connection(e.to_string()))?;
        let consumer_group = consumer_group.into();

        Ok(Self {
            client: Arc::new(client),
            stream_key: stream_key.into(),
            consumer_name: format!("{consumer_group}-consumer"),
            consumer_group,
            dedup_window: DEFAULT_DEDUP_WINDOW,
        })
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    /// Stable consumer name; pending entries are redelivered to the same name.
    pub fn with_consumer_name(mut self, consumer_name: impl Into<String>) -> Self {
        self.consumer_name = consumer_name.into();
        self
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    fn connection(&self) -> Result<redis::Connection, RedisStreamsError> {
        self.client
            .get_connection()
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))
    }

    fn dedup_key(&self, dedup_id: &str) -> String {
        format!("{}:dedup:{}", self.stream_key, dedup_id)
    }

    /// Ensure a consumer group exists (idempotent).
    pub fn ensure_consumer_group(&self, group_name: &str) -> Result<(), RedisStreamsError> {
        let mut conn = self.connection()?;

        // MKSTREAM creates the stream when missing; BUSYGROUP means it already exists.
        let created: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_key)
            .arg(group_name)
            .arg("0")
            .arg("MKSTREAM")
            .query(&mut conn);

        match created {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(RedisStreamsError::Command(format!("XGROUP CREATE failed: {e}"))),
        }
    }

    #[instrument(
        skip(self, message),
        fields(stream_key = %self.stream_key, message_id = %message.message_id()),
        err
    )]
    fn publish_sync(&self, message: BusMessage) -> Result<(), RedisStreamsError> {
        let fields = stream_fields(&message)?;
        let mut conn = self.connection()?;

        if let Some(dedup_id) = message.dedup_id() {
            let claimed: Option<String> = redis::cmd("SET")
                .arg(self.dedup_key(dedup_id))
                .arg(1)
                .arg("NX")
                .arg("PX")
                .arg(self.dedup_window.as_millis() as u64)
                .query(&mut conn)
                .map_err(|e| RedisStreamsError::Command(format!("SET NX failed: {e}")))?;

            if claimed.is_none() {
                debug!(dedup_id, "duplicate publish suppressed");
                return Ok(());
            }
        }

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.stream_key).arg("*");
        for (field, value) in &fields {
            cmd.arg(field).arg(value);
        }
        let _: String = cmd
            .query(&mut conn)
            .map_err(|e| RedisStreamsError::Command(format!("XADD failed: {e}")))?;

        Ok(())
    }

    fn read_group_sync(
        &self,
        conn: &mut redis::Connection,
        group_name: &str,
        start_id: &str,
    ) -> Result<Vec<StreamEntry>, RedisStreamsError> {
        let reply: redis::Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group_name)
            .arg(&self.consumer_name)
            .arg("COUNT")
            .arg(READ_COUNT)
            .arg("BLOCK")
            .arg(BLOCK_MS)
            .arg("STREAMS")
            .arg(&self.stream_key)
            .arg(start_id)
            .query(conn)
            .map_err(|e| RedisStreamsError::Command(format!("XREADGROUP failed: {e}")))?;

        parse_read_reply(reply)
    }

    fn acknowledge_sync(
        &self,
        conn: &mut redis::Connection,
        group_name: &str,
        entry_ids: &[String],
    ) -> Result<(), RedisStreamsError> {
        if entry_ids.is_empty() {
            return Ok(());
        }

        let _: u64 = redis::cmd("XACK")
            .arg(&self.stream_key)
            .arg(group_name)
            .arg(entry_ids)
            .query(conn)
            .map_err(|e| RedisStreamsError::Command(format!("XACK failed: {e}")))?;

        Ok(())
    }

    /// Subscribe as a member of `group_name`.
    ///
    /// The reader waits for one settlement per handed-off message before it
    /// reads on.
    pub fn subscribe_with_group(&self, group_name: &str) -> Subscription<BusMessage> {
        let (tx, rx) = mpsc::channel();
        let (settle_tx, settle_rx) = mpsc::channel();
        let bus = self.clone();
        let group = group_name.to_string();

        let spawned = thread::Builder::new()
            .name(format!("redis-streams-{group}"))
            .spawn(move || bus.read_loop(&group, tx, settle_rx));
        if let Err(e) = spawned {
            error!(error = %e, "failed to spawn redis streams reader");
        }

        Subscription::with_settlements(rx, settle_tx)
    }

    fn read_loop(&self, group_name: &str, tx: mpsc::Sender<BusMessage>, settlements: mpsc::Receiver<Settlement>) {
        if let Err(e) = self.ensure_consumer_group(group_name) {
            error!(group = group_name, error = %e, "failed to create consumer group");
        }

        let mut cursor = ReadCursor::new();

        loop {
            let mut conn = match self.connection() {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "redis unavailable; retrying");
                    thread::sleep(RETRY_BACKOFF);
                    continue;
                }
            };

            loop {
                let start_id = cursor.start_id(Instant::now());
                let entries = match self.read_group_sync(&mut conn, group_name, &start_id) {
                    Ok(entries) => entries,
                    Err(e) => {
                        error!(group = group_name, error = %e, "failed to read from stream");
                        thread::sleep(RETRY_BACKOFF);
                        cursor.restart();
                        break;
                    }
                };
                cursor.advance(entries.last().map(|entry| entry.entry_id.as_str()));

                let mut done = Vec::with_capacity(entries.len());
                let mut closed = false;
                for entry in entries {
                    let message = match entry.message {
                        Ok(message) => message,
                        Err(e) => {
                            warn!(entry_id = %entry.entry_id, error = %e, "dropping undecodable stream entry");
                            done.push(entry.entry_id);
                            continue;
                        }
                    };

                    if tx.send(message).is_err() {
                        closed = true;
                        break;
                    }
                    match settlements.recv() {
                        Ok(Settlement::Done) => done.push(entry.entry_id),
                        Ok(Settlement::Failed) => {
                            debug!(entry_id = %entry.entry_id, "entry left pending for redelivery");
                            cursor.schedule_redelivery(Instant::now(), REDELIVERY_DELAY);
                        }
                        Err(_) => {
                            closed = true;
                            break;
                        }
                    }
                }

                if let Err(e) = self.acknowledge_sync(&mut conn, group_name, &done) {
                    error!(group = group_name, error = %e, "failed to acknowledge entries");
                    cursor.schedule_redelivery(Instant::now(), REDELIVERY_DELAY);
                }
                if closed {
                    return;
                }
            }
        }
    }
}

/// Where the next `XREADGROUP` starts.
///
/// Pending entries (delivered to this consumer, never acknowledged) are paged
/// through by id starting after `0`; once that page comes back empty the reader
/// switches to `>` for new entries.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ReadCursor {
    pending_after: Option<String>,
    redeliver_at: Option<Instant>,
}

impl ReadCursor {
    fn new() -> Self {
        Self {
            pending_after: Some("0".to_string()),
            redeliver_at: None,
        }
    }

    fn start_id(&mut self, now: Instant) -> String {
        if self.pending_after.is_none() && self.redeliver_at.is_some_and(|at| now >= at) {
            self.redeliver_at = None;
            self.pending_after = Some("0".to_string());
        }
        self.pending_after.clone().unwrap_or_else(|| ">".to_string())
    }

    /// Record the last entry id of a batch read at the current cursor.
    fn advance(&mut self, last_entry_id: Option<&str>) {
        if self.pending_after.is_some() {
            self.pending_after = last_entry_id.map(str::to_string);
        }
    }

    fn schedule_redelivery(&mut self, now: Instant, delay: Duration) {
        self.redeliver_at.get_or_insert(now + delay);
    }

    fn restart(&mut self) {
        self.pending_after = Some("0".to_string());
    }
}

impl EventBus<BusMessage> for RedisStreamsEventBus {
    type Error = RedisStreamsError;

    fn publish(&self, message: BusMessage) -> Result<(), Self::Error> {
        self.publish_sync(message)
    }

    fn subscribe(&self) -> Subscription<BusMessage> {
        self.subscribe_with_group(&self.consumer_group)
    }
}

/// One stream entry; an undecodable entry is acknowledged without delivery.
#[derive(Debug)]
struct StreamEntry {
    entry_id: String,
    message: Result<BusMessage, RedisStreamsError>,
}

fn stream_fields(message: &BusMessage) -> Result<Vec<(&'static str, String)>, RedisStreamsError> {
    let mut fields = vec![("message_id", message.message_id().to_string())];
    if let Some(group_id) = message.group_id() {
        fields.push(("group_id", group_id.to_string()));
    }
    if let Some(dedup_id) = message.dedup_id() {
        fields.push(("dedup_id", dedup_id.to_string()));
    }
    if let Some(operation) = message.attribute(OPERATION_ATTRIBUTE) {
        fields.push(("operation", operation.to_string()));
    }
    let attributes =
        serde_json::to_string(message.attributes()).map_err(|e| RedisStreamsError::Serialization(e.to_string()))?;
    fields.push(("attributes", attributes));
    fields.push(("body", message.body().to_string()));
    Ok(fields)
}

fn bulk(value: redis::Value, what: &str) -> Result<Vec<redis::Value>, RedisStreamsError> {
    match value {
        redis::Value::Bulk(items) => Ok(items),
        other => Err(RedisStreamsError::Deserialization(format!(
            "expected array for {what}, got {other:?}"
        ))),
    }
}

fn data(value: &redis::Value, what: &str) -> Result<String, RedisStreamsError> {
    match value {
        redis::Value::Data(bytes) => Ok(String::from_utf8_lossy(bytes).to_string()),
        redis::Value::Status(s) => Ok(s.clone()),
        other => Err(RedisStreamsError::Deserialization(format!(
            "expected string for {what}, got {other:?}"
        ))),
    }
}

/// Parse an `XREADGROUP` reply: `[[stream, [[id, [k, v, ...]], ...]], ...]`.
///
/// A `Nil` reply (block timeout) is an empty batch.
fn parse_read_reply(reply: redis::Value) -> Result<Vec<StreamEntry>, RedisStreamsError> {
    if reply == redis::Value::Nil {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for stream in bulk(reply, "reply")? {
        let mut stream = bulk(stream, "stream")?.into_iter();
        let _stream_key = stream.next();
        let Some(items) = stream.next() else {
            continue;
        };
        for item in bulk(items, "entries")? {
            entries.push(parse_stream_entry(item)?);
        }
    }
    Ok(entries)
}

fn parse_stream_entry(entry: redis::Value) -> Result<StreamEntry, RedisStreamsError> {
    let entry = bulk(entry, "entry")?;
    let [id, fields] = <[redis::Value; 2]>::try_from(entry)
        .map_err(|_| RedisStreamsError::Deserialization("entry must be [id, fields]".to_string()))?;

    let entry_id = data(&id, "entry id")?;

    // Pending entries whose payload was trimmed come back with Nil fields.
    if fields == redis::Value::Nil {
        return Ok(StreamEntry {
            entry_id,
            message: Err(RedisStreamsError::Deserialization("entry was deleted".to_string())),
        });
    }

    let mut map = HashMap::new();
    for pair in bulk(fields, "fields")?.chunks(2) {
        if let [key, value] = pair {
            map.insert(data(key, "field")?, data(value, "value")?);
        }
    }

    let message = message_from_fields(&entry_id, map);
    Ok(StreamEntry { entry_id, message })
}

fn message_from_fields(entry_id: &str, mut fields: HashMap<String, String>) -> Result<BusMessage, RedisStreamsError> {
    let body = fields
        .remove("body")
        .ok_or_else(|| RedisStreamsError::Deserialization("missing body field".to_string()))?;

    let message_id = fields.remove("message_id").unwrap_or_else(|| entry_id.to_string());
    let mut message = BusMessage::new(body).with_message_id(message_id);

    if let (Some(group_id), Some(dedup_id)) = (fields.remove("group_id"), fields.remove("dedup_id")) {
        message = message.with_ordering(group_id, dedup_id);
    }

    if let Some(raw) = fields.remove("attributes") {
        let attributes: BTreeMap<String, MessageAttribute> =
            serde_json::from_str(&raw).map_err(|e| RedisStreamsError::Deserialization(format!("attributes: {e}")))?;
        for (name, attribute) in attributes {
            message = message.with_attribute(name, attribute);
        }
    }

    // Producers that only set the flat field still carry an operation.
    if message.attribute(OPERATION_ATTRIBUTE).is_none() {
        if let Some(operation) = fields.remove("operation") {
            message = message.with_attribute(OPERATION_ATTRIBUTE, MessageAttribute::string(operation));
        }
    }

    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::Value;

    fn d(s: &str) -> Value {
        Value::Data(s.as_bytes().to_vec())
    }

    fn entry(id: &str, fields: &[(&str, &str)]) -> Value {
        Value::Bulk(vec![
            d(id),
            Value::Bulk(fields.iter().flat_map(|(k, v)| [d(k), d(v)]).collect()),
        ])
    }

    fn reply(entries: Vec<Value>) -> Value {
        Value::Bulk(vec![Value::Bulk(vec![d("posts:changes"), Value::Bulk(entries)])])
    }

    #[test]
    fn cursor_drains_pending_entries_before_new_ones() {
        let now = Instant::now();
        let mut cursor = ReadCursor::new();

        assert_eq!(cursor.start_id(now), "0");
        cursor.advance(Some("7-0"));
        assert_eq!(cursor.start_id(now), "7-0");
        cursor.advance(None);
        assert_eq!(cursor.start_id(now), ">");
        cursor.advance(Some("9-0"));
        assert_eq!(cursor.start_id(now), ">");
    }

    #[test]
    fn failed_entry_triggers_a_pending_sweep_after_the_delay() {
        let now = Instant::now();
        let mut cursor = ReadCursor::new();
        cursor.advance(None);

        cursor.schedule_redelivery(now, Duration::from_secs(5));
        assert_eq!(cursor.start_id(now + Duration::from_secs(1)), ">");
        assert_eq!(cursor.start_id(now + Duration::from_secs(5)), "0");

        cursor.advance(Some("3-0"));
        cursor.advance(None);
        assert_eq!(cursor.start_id(now + Duration::from_secs(6)), ">");
    }

    #[test]
    fn reconnect_rereads_pending_entries() {
        let now = Instant::now();
        let mut cursor = ReadCursor::new();
        cursor.advance(None);
        assert_eq!(cursor.start_id(now), ">");

        cursor.restart();
        assert_eq!(cursor.start_id(now), "0");
    }

    #[test]
    fn nil_reply_is_an_empty_batch() {
        assert!(parse_read_reply(Value::Nil).unwrap().is_empty());
    }

    #[test]
    fn published_fields_parse_back_into_the_same_message() {
        let original = BusMessage::new(r#"[{"id":"1"}]"#)
            .with_ordering("corr-1", "corr-1")
            .with_attribute(OPERATION_ATTRIBUTE, MessageAttribute::string("CREATE"));

        let fields = stream_fields(&original).unwrap();
        let pairs: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let parsed = parse_read_reply(reply(vec![entry("1-0", &pairs)])).unwrap();

        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].entry_id, "1-0");
        assert_eq!(parsed[0].message.as_ref().unwrap(), &original);
    }

    #[test]
    fn minimal_entry_uses_stream_id_and_flat_operation() {
        let parsed = parse_read_reply(reply(vec![entry(
            "1700000000000-3",
            &[("operation", "DELETE"), ("body", "{}")],
        )]))
        .unwrap();

        let message = parsed[0].message.as_ref().unwrap();
        assert_eq!(message.message_id(), "1700000000000-3");
        assert_eq!(message.attribute(OPERATION_ATTRIBUTE), Some("DELETE"));
        assert_eq!(message.group_id(), None);
    }

    #[test]
    fn entry_without_body_is_kept_for_acknowledgement() {
        let parsed = parse_read_reply(reply(vec![
            entry("1-0", &[("operation", "CREATE")]),
            entry("2-0", &[("body", "{}")]),
        ]))
        .unwrap();

        assert_eq!(parsed.len(), 2);
        assert!(parsed[0].message.is_err());
        assert!(parsed[1].message.is_ok());
    }

    #[test]
    fn deleted_pending_entry_is_reported_not_fatal() {
        let parsed = parse_read_reply(reply(vec![Value::Bulk(vec![d("5-0"), Value::Nil])])).unwrap();
        assert_eq!(parsed[0].entry_id, "5-0");
        assert!(parsed[0].message.is_err());
    }

    #[test]
    fn malformed_reply_shape_is_an_error() {
        assert!(parse_read_reply(Value::Int(3)).is_err());
        assert!(parse_read_reply(reply(vec![Value::Bulk(vec![d("1-0")])])).is_err());
    }
}
