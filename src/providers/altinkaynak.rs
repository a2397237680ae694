//! Altınkaynak `GetMain` over SOAP 1.1.
//!
//! One binding: credentials go in the `AuthHeader` SOAP header declared by the
//! service contract. A failed call is retried once before giving up.

use super::ProviderAdapter;
use super::util::{http_client, parse_turkish_number, with_retry};
use crate::core::FetchError;
use crate::core::config::CurrenciesProviderConfig;
use crate::core::market::{RateKind, RateQuote, RateSnapshot};
use anyhow::Result;
use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use std::collections::HashMap;
use tracing::{debug, info, instrument};

const NAME: &str = "altinkaynak";
const SERVICE_PATH: &str = "/DataService.asmx";
const NAMESPACE: &str = "http://data.altinkaynak.com/";
const DEFAULT_CREDENTIAL: &str = "AltinkaynakWebServis";
const RETRY_DELAY_MS: u64 = 1000;

pub struct AltinkaynakProvider {
    url: String,
    username: String,
    password: String,
    client: reqwest::Client,
}

impl AltinkaynakProvider {
    pub fn new(config: &CurrenciesProviderConfig) -> Result<Self> {
        Ok(Self {
            url: format!(
                "{}{}",
                config.resolved_base_url().trim_end_matches('/'),
                SERVICE_PATH
            ),
            username: config
                .username
                .clone()
                .unwrap_or_else(|| DEFAULT_CREDENTIAL.to_string()),
            password: config
                .password
                .clone()
                .unwrap_or_else(|| DEFAULT_CREDENTIAL.to_string()),
            client: http_client(config.timeout_secs)?,
        })
    }

    fn envelope(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<soap:Envelope xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:xsd="http://www.w3.org/2001/XMLSchema" xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Header>
    <AuthHeader xmlns="{ns}">
      <Username>{user}</Username>
      <Password>{pass}</Password>
    </AuthHeader>
  </soap:Header>
  <soap:Body>
    <GetMain xmlns="{ns}" />
  </soap:Body>
</soap:Envelope>"#,
            ns = NAMESPACE,
            user = escape(self.username.as_str()),
            pass = escape(self.password.as_str()),
        )
    }
}

/// Text content of the first element named `tag`, ignoring namespaces.
fn element_text(xml: &str, tag: &str) -> Result<Option<String>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut inside = false;
    let mut text = String::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == tag.as_bytes() => inside = true,
            Event::Text(t) if inside => text.push_str(&t.unescape()?),
            Event::CData(c) if inside => text.push_str(&String::from_utf8_lossy(&c.into_inner())),
            Event::End(e) if inside && e.local_name().as_ref() == tag.as_bytes() => {
                return Ok(Some(text));
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

/// Child element texts of every `record` element.
fn records(xml: &str, record: &str) -> Result<Vec<HashMap<String, String>>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut rows = Vec::new();
    let mut current: Option<HashMap<String, String>> = None;
    let mut field: Option<String> = None;
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == record {
                    current = Some(HashMap::new());
                } else if current.is_some() {
                    field = Some(name);
                }
            }
            Event::Text(t) => {
                if let (Some(row), Some(name)) = (current.as_mut(), field.as_ref()) {
                    row.entry(name.clone())
                        .or_default()
                        .push_str(&t.unescape()?);
                }
            }
            Event::End(e) => {
                if e.local_name().as_ref() == record.as_bytes() {
                    rows.extend(current.take());
                }
                field = None;
            }
            Event::Eof => return Ok(rows),
            _ => {}
        }
    }
}

fn kind_of(code: &str) -> RateKind {
    if code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase()) {
        RateKind::Currency
    } else {
        RateKind::Gold
    }
}

pub(crate) fn parse_get_main(body: &str) -> Result<RateSnapshot, FetchError> {
    let inner = element_text(body, "GetMainResult")
        .map_err(|e| FetchError::malformed(NAME, e))?
        .ok_or_else(|| FetchError::malformed(NAME, "missing GetMainResult"))?;
    let rows = records(&inner, "Kur").map_err(|e| FetchError::malformed(NAME, e))?;

    let mut snapshot = RateSnapshot {
        source: "Altınkaynak".to_string(),
        ..Default::default()
    };
    for row in rows {
        let Some(code) = row.get("Kod").map(|c| c.trim().to_string()) else {
            continue;
        };
        let buy = row
            .get("Alis")
            .and_then(|v| parse_turkish_number(v))
            .unwrap_or_default();
        let sell = row
            .get("Satis")
            .and_then(|v| parse_turkish_number(v))
            .unwrap_or_default();
        if snapshot.update_date.is_none() {
            snapshot.update_date = row.get("GuncellenmeZamani").cloned();
        }
        let rate = match (buy > 0.0, sell > 0.0) {
            (true, true) => (buy + sell) / 2.0,
            (true, false) => buy,
            _ => sell,
        };
        snapshot.insert(RateQuote {
            name: row.get("Aciklama").cloned().unwrap_or_else(|| code.clone()),
            kind: kind_of(&code),
            code,
            buy,
            sell,
            rate,
            change: 0.0,
            usd_price: None,
        });
    }

    if snapshot.is_empty() {
        return Err(FetchError::malformed(NAME, "no Kur rows in GetMain result"));
    }
    Ok(snapshot.with_base_currency())
}

#[async_trait]
impl ProviderAdapter<RateSnapshot> for AltinkaynakProvider {
    fn name(&self) -> &str {
        NAME
    }

    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> Result<RateSnapshot, FetchError> {
        let envelope = self.envelope();
        debug!("Calling GetMain at {}", self.url);
        let response = with_retry(
            || async {
                self.client
                    .post(&self.url)
                    .header(reqwest::header::CONTENT_TYPE, "text/xml; charset=utf-8")
                    .header("SOAPAction", format!("\"{NAMESPACE}GetMain\""))
                    .body(envelope.clone())
                    .send()
                    .await?
                    .error_for_status()
            },
            1,
            RETRY_DELAY_MS,
        )
        .await
        .map_err(|e| FetchError::from_reqwest(NAME, e))?;

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(NAME, e))?;
        let snapshot = parse_get_main(&body)?;
        info!(
            currencies = snapshot.currencies.len(),
            gold = snapshot.gold.len(),
            "Fetched rates from Altınkaynak"
        );
        Ok(snapshot)
    }
}
