use crate::error::{ProjectionError, Result};
use crate::transform::{Message, MessageTransformer};
use async_trait::async_trait;
use lapin::types::AMQPValue;
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// Name of the header whose value becomes the outgoing payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HeaderKey(Cow<'static, str>);

impl HeaderKey {
    /// Remote ENA FTP directory holding the sequence report.
    pub const ENA_FTP_SEQ_REP_DIR: HeaderKey = HeaderKey(Cow::Borrowed("enaFtpSeqRepDir"));
    /// Local filesystem path the sequence report was downloaded to.
    pub const SEQ_REPORT_LOCAL_PATH: HeaderKey = HeaderKey(Cow::Borrowed("seqReportLocalPath"));

    pub fn new(key: impl Into<String>) -> Self {
        Self(Cow::Owned(key.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HeaderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What to do when the projected header is absent (or `Void`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingHeaderPolicy {
    /// Emit the message with an empty payload.
    #[default]
    Empty,
    /// Fail the projection with [`ProjectionError::MissingHeader`].
    Reject,
}

impl FromStr for MissingHeaderPolicy {
    type Err = ProjectionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "empty" => Ok(Self::Empty),
            "reject" => Ok(Self::Reject),
            other => Err(ProjectionError::InvalidPolicy(other.to_string())),
        }
    }
}

/// Stateless step that replaces a message payload with one of its header values.
///
/// Properties, headers included, are carried over untouched. Holds no mutable
/// state, so a single instance can be shared across tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderProjector {
    key: HeaderKey,
    on_missing: MissingHeaderPolicy,
}

impl HeaderProjector {
    pub fn new(key: HeaderKey, on_missing: MissingHeaderPolicy) -> Self {
        Self { key, on_missing }
    }

    pub fn key(&self) -> &HeaderKey {
        &self.key
    }

    pub fn on_missing(&self) -> MissingHeaderPolicy {
        self.on_missing
    }

    /// Build a new message whose payload is the value of this projector's header.
    ///
    /// # Errors
    /// Returns [`ProjectionError::MissingHeader`] when the header is absent and the
    /// policy is [`MissingHeaderPolicy::Reject`], and
    /// [`ProjectionError::UnsupportedValue`] when the header holds a table, array
    /// or decimal value.
    pub fn project(&self, msg: &Message<'_>) -> Result<Message<'static>> {
        let value = msg
            .properties
            .headers()
            .as_ref()
            .and_then(|headers| headers.inner().get(self.key.as_str()));

        let payload = match value.and_then(|v| coerce_to_payload(self.key.as_str(), v).transpose())
        {
            Some(payload) => payload?,
            None => match self.on_missing {
                MissingHeaderPolicy::Empty => Vec::new(),
                MissingHeaderPolicy::Reject => {
                    return Err(ProjectionError::MissingHeader(self.key.to_string()));
                }
            },
        };

        Ok(Message {
            data: Cow::Owned(payload),
            properties: msg.properties.clone(),
            route: Cow::Owned(msg.route.clone().into_owned()),
        })
    }
}

#[async_trait]
impl MessageTransformer for HeaderProjector {
    async fn transform<'a>(&self, input: Message<'a>) -> anyhow::Result<Message<'a>> {
        Ok(self.project(&input)?)
    }
}

/// Text form of a header value. `Ok(None)` means the header carries no value.
fn coerce_to_payload(key: &str, value: &AMQPValue) -> Result<Option<Vec<u8>>> {
    let unsupported = |kind| ProjectionError::UnsupportedValue {
        key: key.to_string(),
        kind,
    };

    let payload = match value {
        AMQPValue::Void => return Ok(None),
        AMQPValue::LongString(s) => s.as_bytes().to_vec(),
        AMQPValue::ShortString(s) => s.as_str().as_bytes().to_vec(),
        AMQPValue::ByteArray(b) => b.as_slice().to_vec(),
        AMQPValue::Boolean(b) => b.to_string().into_bytes(),
        AMQPValue::ShortShortInt(n) => n.to_string().into_bytes(),
        AMQPValue::ShortShortUInt(n) => n.to_string().into_bytes(),
        AMQPValue::ShortInt(n) => n.to_string().into_bytes(),
        AMQPValue::ShortUInt(n) => n.to_string().into_bytes(),
        AMQPValue::LongInt(n) => n.to_string().into_bytes(),
        AMQPValue::LongUInt(n) => n.to_string().into_bytes(),
        AMQPValue::LongLongInt(n) => n.to_string().into_bytes(),
        AMQPValue::Timestamp(n) => n.to_string().into_bytes(),
        AMQPValue::Float(n) => n.to_string().into_bytes(),
        AMQPValue::Double(n) => n.to_string().into_bytes(),
        AMQPValue::DecimalValue(_) => return Err(unsupported("decimal")),
        AMQPValue::FieldArray(_) => return Err(unsupported("array")),
        AMQPValue::FieldTable(_) => return Err(unsupported("table")),
    };

    Ok(Some(payload))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lapin::BasicProperties;
    use lapin::types::{FieldArray, FieldTable};

    pub(crate) fn message_with_headers(entries: &[(&str, AMQPValue)]) -> Message<'static> {
        let mut headers = FieldTable::default();
        for (name, value) in entries {
            headers.insert((*name).into(), value.clone());
        }
        Message::new(
            b"ignored".to_vec(),
            BasicProperties::default()
                .with_headers(headers)
                .with_content_type("text/plain".into()),
            "ena-ftp-dir",
        )
    }

    pub(crate) fn seq_report_message() -> Message<'static> {
        message_with_headers(&[
            ("enaFtpSeqRepDir", AMQPValue::LongString("/pub/ena/seq1".into())),
            ("seqReportLocalPath", AMQPValue::LongString("/tmp/local1".into())),
        ])
    }

    fn empty(key: HeaderKey) -> HeaderProjector {
        HeaderProjector::new(key, MissingHeaderPolicy::Empty)
    }

    #[test]
    fn projects_ena_ftp_dir_into_payload() {
        let msg = seq_report_message();
        let out = empty(HeaderKey::ENA_FTP_SEQ_REP_DIR).project(&msg).unwrap();

        assert_eq!(out.data.as_ref(), b"/pub/ena/seq1");
        assert_eq!(out.properties.headers(), msg.properties.headers());
    }

    #[test]
    fn projects_local_path_into_payload() {
        let msg = seq_report_message();
        let out = empty(HeaderKey::SEQ_REPORT_LOCAL_PATH).project(&msg).unwrap();

        assert_eq!(out.data.as_ref(), b"/tmp/local1");
        assert_eq!(out.properties.headers(), msg.properties.headers());
    }

    #[test]
    fn keeps_every_property_and_the_input_untouched() {
        let msg = seq_report_message();
        let out = empty(HeaderKey::ENA_FTP_SEQ_REP_DIR).project(&msg).unwrap();

        assert_eq!(out.properties.content_type(), msg.properties.content_type());
        assert_eq!(out.route, msg.route);
        assert_eq!(msg.data.as_ref(), b"ignored");

        let keys: Vec<_> = out
            .properties
            .headers()
            .as_ref()
            .unwrap()
            .inner()
            .keys()
            .map(|k| k.as_str().to_string())
            .collect();
        assert_eq!(keys, ["enaFtpSeqRepDir", "seqReportLocalPath"]);
    }

    #[test]
    fn projecting_twice_gives_the_same_message() {
        let msg = seq_report_message();
        let projector = empty(HeaderKey::SEQ_REPORT_LOCAL_PATH);

        let first = projector.project(&msg).unwrap();
        let second = projector.project(&msg).unwrap();

        assert_eq!(first.data, second.data);
        assert_eq!(first.properties.headers(), second.properties.headers());
    }

    #[test]
    fn missing_header_yields_empty_payload_by_default() {
        let msg = message_with_headers(&[]);
        let out = empty(HeaderKey::ENA_FTP_SEQ_REP_DIR).project(&msg).unwrap();

        assert!(out.data.is_empty());
        assert_eq!(out.properties.headers(), msg.properties.headers());
    }

    #[test]
    fn missing_header_without_any_header_table_yields_empty_payload() {
        let msg = Message::new(b"ignored".to_vec(), BasicProperties::default(), "ena-ftp-dir");
        let out = empty(HeaderKey::ENA_FTP_SEQ_REP_DIR).project(&msg).unwrap();

        assert!(out.data.is_empty());
        assert!(out.properties.headers().is_none());
    }

    #[test]
    fn missing_header_is_rejected_when_configured() {
        let msg = message_with_headers(&[("other", AMQPValue::LongString("x".into()))]);
        let projector =
            HeaderProjector::new(HeaderKey::ENA_FTP_SEQ_REP_DIR, MissingHeaderPolicy::Reject);

        let err = projector.project(&msg).unwrap_err();
        assert_eq!(err, ProjectionError::MissingHeader("enaFtpSeqRepDir".into()));
    }

    #[test]
    fn void_header_counts_as_missing() {
        let msg = message_with_headers(&[("enaFtpSeqRepDir", AMQPValue::Void)]);

        let out = empty(HeaderKey::ENA_FTP_SEQ_REP_DIR).project(&msg).unwrap();
        assert!(out.data.is_empty());

        let strict =
            HeaderProjector::new(HeaderKey::ENA_FTP_SEQ_REP_DIR, MissingHeaderPolicy::Reject);
        assert!(matches!(
            strict.project(&msg),
            Err(ProjectionError::MissingHeader(_))
        ));
    }

    #[test]
    fn scalar_headers_are_rendered_as_text() {
        let msg = message_with_headers(&[
            ("count", AMQPValue::LongLongInt(-42)),
            ("flag", AMQPValue::Boolean(true)),
            ("name", AMQPValue::ShortString("seq".into())),
        ]);

        let project = |key: &str| empty(HeaderKey::new(key)).project(&msg).unwrap().data;
        assert_eq!(project("count").as_ref(), b"-42");
        assert_eq!(project("flag").as_ref(), b"true");
        assert_eq!(project("name").as_ref(), b"seq");
    }

    #[test]
    fn nested_headers_are_rejected() {
        let msg = message_with_headers(&[
            ("list", AMQPValue::FieldArray(FieldArray::default())),
            ("table", AMQPValue::FieldTable(FieldTable::default())),
        ]);

        let err = empty(HeaderKey::new("list")).project(&msg).unwrap_err();
        assert_eq!(
            err,
            ProjectionError::UnsupportedValue {
                key: "list".into(),
                kind: "array"
            }
        );
        assert!(empty(HeaderKey::new("table")).project(&msg).is_err());
    }

    #[test]
    fn policy_parses_case_insensitively() {
        assert_eq!(
            "Reject".parse::<MissingHeaderPolicy>().unwrap(),
            MissingHeaderPolicy::Reject
        );
        assert_eq!(
            " empty ".parse::<MissingHeaderPolicy>().unwrap(),
            MissingHeaderPolicy::Empty
        );
        assert!("drop".parse::<MissingHeaderPolicy>().is_err());
    }

    #[tokio::test]
    async fn transformer_impl_projects() {
        let projector = empty(HeaderKey::SEQ_REPORT_LOCAL_PATH);
        let out = projector.transform(seq_report_message()).await.unwrap();
        assert_eq!(out.data.as_ref(), b"/tmp/local1");
    }
}
