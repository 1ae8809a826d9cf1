//! 邮件/短信网关的 SOAP 报文
//!
//! 网关响应只关心 `<ax21:msg>` 与 `<ax21:kode>` 两个元素，按标签切分提取即可。

use dispatch_shared::error::DispatchError;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;

use super::{HttpDeliveryProvider, transport_error};
use crate::model::{Email, ProviderReply, Sms};

const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const BPJ_NS: &str = "http://bpjs.com";

const MSG_OPEN: &str = "<ax21:msg>";
const MSG_CLOSE: &str = "</ax21:msg>";
const KODE_OPEN: &str = "<ax21:kode>";
const KODE_CLOSE: &str = "</ax21:kode>";

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(raw: &str) -> String {
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn flag(value: bool) -> &'static str {
    if value { "T" } else { "F" }
}

fn envelope(operation: &str, fields: &[(&str, String)]) -> String {
    let mut body = String::new();
    for (name, value) in fields {
        body.push_str(&format!("<bpj:{name}>{}</bpj:{name}>", escape(value)));
    }
    format!(
        r#"<x:Envelope xmlns:x="{SOAP_ENV_NS}" xmlns:bpj="{BPJ_NS}"><x:Header/><x:Body><bpj:{operation}>{body}</bpj:{operation}></x:Body></x:Envelope>"#
    )
}

/// `bpj:sendEmail` 请求；`attachments` 为已编码的附件内容
pub fn build_email_envelope(
    reply_config: &str,
    from: &str,
    email: &Email,
    attachments: &[String],
) -> String {
    envelope(
        "sendEmail",
        &[
            ("cfg", reply_config.to_string()),
            ("from", from.to_string()),
            ("to", email.recipient_to.join(",")),
            ("cc", email.recipient_cc.join(",")),
            ("bcc", email.recipient_bcc.join(",")),
            ("subject", email.subject.clone()),
            ("body", email.content_text.clone()),
            ("isHTML", flag(email.is_html).to_string()),
            ("bodyHTML", email.content_html.clone()),
            ("isAttach", flag(email.is_attach).to_string()),
            ("attach", attachments.join(",")),
            ("attachName", email.attach_name.join(",")),
            ("avl", String::new()),
        ],
    )
}

/// `bpj:sendSMS` 请求
pub fn build_sms_envelope(username: &str, password: &str, sms: &Sms) -> String {
    envelope(
        "sendSMS",
        &[
            ("username", username.to_string()),
            ("password", password.to_string()),
            ("msisdn", sms.recipient_phone_number.clone()),
            ("txt", sms.content.clone()),
            ("avl", String::new()),
        ],
    )
}

fn between<'a>(body: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = body.find(open)? + open.len();
    let len = body[start..].find(close)?;
    Some(&body[start..start + len])
}

/// 提取网关响应中的 msg 与 kode
pub fn parse_reply(body: &str) -> Option<ProviderReply> {
    Some(ProviderReply {
        message: unescape(between(body, MSG_OPEN, MSG_CLOSE)?),
        code: unescape(between(body, KODE_OPEN, KODE_CLOSE)?),
    })
}

impl HttpDeliveryProvider {
    pub(super) async fn post_soap(
        &self,
        service: &'static str,
        url: &str,
        body: String,
    ) -> Result<ProviderReply, DispatchError> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", "")
            .body(body)
            .send()
            .await
            .map_err(|e| transport_error(service, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| transport_error(service, e))?;

        if status != StatusCode::OK {
            return Err(DispatchError::ExternalService {
                service: service.to_string(),
                message: format!("HTTP {status}"),
            });
        }

        parse_reply(&text).ok_or_else(|| DispatchError::ExternalService {
            service: service.to_string(),
            message: "响应缺少 ax21:msg 或 ax21:kode".to_string(),
        })
    }
}
