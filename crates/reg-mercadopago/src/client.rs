//! # Mercado Pago Processor
//!
//! Implementation of the `PaymentProcessor` trait over the Mercado Pago
//! REST API:
//!
//! - `POST /checkout/preferences` for hosted card checkout
//! - `POST /v1/payments` for pix charges
//! - `GET /v1/payments/{id}` for the authoritative payment record

use crate::config::MercadoPagoConfig;
use async_trait::async_trait;
use reg_core::processor::{
    DirectChargeRequest, DirectChargeResponse, PaymentProcessor, PaymentRecord,
    PreferenceRequest, PreferenceResponse, ProcessorPaymentStatus, ProcessorResult,
};
use reg_core::{PackageError, PackageResult, ProcessorError};
use reqwest::{Client, RequestBuilder};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

const PROVIDER: &str = "mercadopago";

/// Currency of every line item
const CURRENCY_ID: &str = "BRL";

/// Mercado Pago processor
pub struct MercadoPagoProcessor {
    config: MercadoPagoConfig,
    client: Client,
}

impl MercadoPagoProcessor {
    /// Create a new processor
    pub fn new(config: MercadoPagoConfig) -> PackageResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PackageError::Configuration(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// Create from environment variables
    pub fn from_env() -> PackageResult<Self> {
        Self::new(MercadoPagoConfig::from_env()?)
    }

    pub fn config(&self) -> &MercadoPagoConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url, path)
    }

    /// Send a request and decode the JSON body, mapping every failure to a
    /// `ProcessorError`
    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> ProcessorResult<T> {
        let response = request
            .header("Authorization", self.config.auth_header())
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            error!("Mercado Pago API error: status={}, body={}", status, body);

            let message = serde_json::from_str::<MercadoPagoErrorResponse>(&body)
                .map(|e| e.message)
                .unwrap_or(body);

            return Err(ProcessorError::Api {
                provider: PROVIDER.to_string(),
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            ProcessorError::Malformed(format!("failed to parse Mercado Pago response: {e}"))
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> ProcessorError {
        if e.is_timeout() {
            ProcessorError::Timeout {
                provider: PROVIDER.to_string(),
                timeout_secs: self.config.timeout.as_secs(),
            }
        } else {
            ProcessorError::Network(e.to_string())
        }
    }
}

fn to_amount(value: Decimal) -> ProcessorResult<f64> {
    value
        .round_dp(2)
        .to_f64()
        .ok_or_else(|| ProcessorError::Malformed(format!("amount {value} is not representable")))
}

#[async_trait]
impl PaymentProcessor for MercadoPagoProcessor {
    #[instrument(skip(self, request), fields(external_reference = %request.external_reference))]
    async fn create_preference(
        &self,
        request: &PreferenceRequest,
    ) -> ProcessorResult<PreferenceResponse> {
        let items = request
            .items
            .iter()
            .map(|item| {
                Ok(MpItem {
                    title: item.title.clone(),
                    quantity: item.quantity,
                    unit_price: to_amount(item.unit_price)?,
                    currency_id: CURRENCY_ID,
                })
            })
            .collect::<ProcessorResult<Vec<_>>>()?;

        let restrictions = &request.restrictions;
        let body = MpPreferenceRequest {
            items,
            payer: MpPayer {
                email: request.payer.email.clone(),
                first_name: None,
            },
            back_urls: MpBackUrls {
                success: request.back_urls.success.clone(),
                failure: request.back_urls.failure.clone(),
                pending: request.back_urls.pending.clone(),
            },
            auto_return: "approved",
            external_reference: request.external_reference.clone(),
            notification_url: request.notification_url.clone(),
            statement_descriptor: request.statement_descriptor.clone(),
            expires: false,
            payment_methods: MpPaymentMethods {
                excluded_payment_methods: restrictions
                    .excluded_payment_methods
                    .iter()
                    .map(|id| MpId { id: id.clone() })
                    .collect(),
                excluded_payment_types: restrictions
                    .excluded_payment_types
                    .iter()
                    .map(|id| MpId { id: id.clone() })
                    .collect(),
                installments: restrictions.max_installments,
                default_installments: restrictions.default_installments,
            },
        };

        debug!("Creating Mercado Pago preference: {} items", body.items.len());

        let response: MpPreferenceResponse = self
            .execute(self.client.post(self.url("/checkout/preferences")).json(&body))
            .await?;

        info!(
            "Created Mercado Pago preference: id={}, url={}",
            response.id, response.init_point
        );

        Ok(PreferenceResponse {
            id: response.id,
            init_point: response.init_point,
            sandbox_init_point: response.sandbox_init_point,
        })
    }

    #[instrument(skip(self, request), fields(external_reference = %request.external_reference))]
    async fn create_direct_charge(
        &self,
        request: &DirectChargeRequest,
    ) -> ProcessorResult<DirectChargeResponse> {
        let body = MpPaymentRequest {
            transaction_amount: to_amount(request.transaction_amount)?,
            description: request.description.clone(),
            payment_method_id: "pix",
            payer: MpPayer {
                email: request.payer.email.clone(),
                first_name: request.payer.first_name.clone(),
            },
            external_reference: request.external_reference.clone(),
            notification_url: request.notification_url.clone(),
        };

        let response: MpPaymentResponse = self
            .execute(
                self.client
                    .post(self.url("/v1/payments"))
                    .header("X-Idempotency-Key", Uuid::new_v4().to_string())
                    .json(&body),
            )
            .await?;

        let transaction_data = response
            .point_of_interaction
            .and_then(|p| p.transaction_data)
            .unwrap_or_default();

        info!(
            "Created Mercado Pago pix charge: id={}, status={}",
            response.id.0, response.status
        );

        Ok(DirectChargeResponse {
            id: response.id.0,
            status: response.status,
            qr_code: transaction_data.qr_code,
            qr_code_base64: transaction_data.qr_code_base64,
            ticket_url: transaction_data.ticket_url,
        })
    }

    #[instrument(skip(self))]
    async fn get_payment(&self, payment_id: &str) -> ProcessorResult<PaymentRecord> {
        if payment_id.is_empty() || !payment_id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ProcessorError::InvalidRequest(format!(
                "payment id '{payment_id}' is not numeric"
            )));
        }

        let response: MpPaymentResponse = self
            .execute(self.client.get(self.url(&format!("/v1/payments/{payment_id}"))))
            .await?;

        debug!(
            "Fetched Mercado Pago payment: id={}, status={}",
            response.id.0, response.status
        );

        Ok(PaymentRecord {
            id: response.id.0,
            status: response.status,
            external_reference: response.external_reference,
            amount: response
                .transaction_amount
                .and_then(|a| Decimal::try_from(a).ok())
                .map(|a| a.round_dp(2)),
        })
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}

// =============================================================================
// Mercado Pago API Types
// =============================================================================

#[derive(Debug, Serialize)]
struct MpItem {
    title: String,
    quantity: u32,
    unit_price: f64,
    currency_id: &'static str,
}

#[derive(Debug, Serialize)]
struct MpPayer {
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_name: Option<String>,
}

#[derive(Debug, Serialize)]
struct MpBackUrls {
    success: String,
    failure: String,
    pending: String,
}

#[derive(Debug, Serialize)]
struct MpId {
    id: String,
}

#[derive(Debug, Serialize)]
struct MpPaymentMethods {
    excluded_payment_methods: Vec<MpId>,
    excluded_payment_types: Vec<MpId>,
    installments: u32,
    default_installments: u32,
}

#[derive(Debug, Serialize)]
struct MpPreferenceRequest {
    items: Vec<MpItem>,
    payer: MpPayer,
    back_urls: MpBackUrls,
    auto_return: &'static str,
    external_reference: String,
    notification_url: String,
    statement_descriptor: String,
    expires: bool,
    payment_methods: MpPaymentMethods,
}

#[derive(Debug, Deserialize)]
struct MpPreferenceResponse {
    id: String,
    init_point: String,
    #[serde(default)]
    sandbox_init_point: Option<String>,
}

#[derive(Debug, Serialize)]
struct MpPaymentRequest {
    transaction_amount: f64,
    description: String,
    payment_method_id: &'static str,
    payer: MpPayer,
    external_reference: String,
    notification_url: String,
}

/// Payment ids are numbers on the wire; kept as strings here
#[derive(Debug)]
struct MpPaymentId(String);

impl<'de> Deserialize<'de> for MpPaymentId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(u64),
            Text(String),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Number(n) => MpPaymentId(n.to_string()),
            Repr::Text(s) => MpPaymentId(s),
        })
    }
}

#[derive(Debug, Deserialize)]
struct MpPaymentResponse {
    id: MpPaymentId,
    status: ProcessorPaymentStatus,
    #[serde(default)]
    external_reference: Option<String>,
    #[serde(default)]
    transaction_amount: Option<f64>,
    #[serde(default)]
    point_of_interaction: Option<MpPointOfInteraction>,
}

#[derive(Debug, Deserialize)]
struct MpPointOfInteraction {
    #[serde(default)]
    transaction_data: Option<MpTransactionData>,
}

#[derive(Debug, Default, Deserialize)]
struct MpTransactionData {
    #[serde(default)]
    qr_code: Option<String>,
    #[serde(default)]
    qr_code_base64: Option<String>,
    #[serde(default)]
    ticket_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MercadoPagoErrorResponse {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use reg_core::processor::{BackUrls, CardRestrictions, Payer, ProcessorLineItem};
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn processor(server: &MockServer) -> MercadoPagoProcessor {
        let config = MercadoPagoConfig::new("TEST-token").with_api_base_url(server.uri());
        MercadoPagoProcessor::new(config).unwrap()
    }

    fn payer() -> Payer {
        Payer {
            email: "ana@example.com".into(),
            first_name: Some("Ana".into()),
        }
    }

    fn preference_request() -> PreferenceRequest {
        PreferenceRequest {
            items: vec![ProcessorLineItem {
                title: "Inscrição - Youth Conference".into(),
                quantity: 1,
                unit_price: dec!(150.00),
            }],
            payer: payer(),
            back_urls: BackUrls {
                success: "https://app.example/payment/success/1".into(),
                failure: "https://app.example/payment/failure/1".into(),
                pending: "https://app.example/payment/pending/1".into(),
            },
            notification_url: "https://app.example/webhook/mercadopago".into(),
            external_reference: "PKG-20250114-ABC123".into(),
            statement_descriptor: "INSCRICAO EVENTO".into(),
            restrictions: CardRestrictions::credit_card_only(12),
        }
    }

    #[tokio::test]
    async fn test_create_preference() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/checkout/preferences"))
            .and(header("Authorization", "Bearer TEST-token"))
            .and(body_partial_json(json!({
                "external_reference": "PKG-20250114-ABC123",
                "items": [{"title": "Inscrição - Youth Conference", "quantity": 1, "unit_price": 150.0}],
                "payment_methods": {
                    "excluded_payment_methods": [{"id": "pix"}],
                    "excluded_payment_types": [{"id": "debit_card"}, {"id": "ticket"}],
                    "installments": 12,
                    "default_installments": 1
                }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "123-pref",
                "init_point": "https://www.mercadopago.com.br/checkout/v1/redirect?pref_id=123-pref",
                "sandbox_init_point": "https://sandbox.mercadopago.com.br/checkout/v1/redirect?pref_id=123-pref"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = processor(&server)
            .create_preference(&preference_request())
            .await
            .unwrap();

        assert_eq!(response.id, "123-pref");
        assert!(response.sandbox_init_point.is_some());
    }

    #[tokio::test]
    async fn test_create_pix_charge() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payments"))
            .and(header_exists("X-Idempotency-Key"))
            .and(body_partial_json(json!({
                "payment_method_id": "pix",
                "transaction_amount": 250.5,
                "external_reference": "PKG-20250114-ABC123"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": 1319283746u64,
                "status": "pending",
                "point_of_interaction": {
                    "transaction_data": {
                        "qr_code": "00020126580014br.gov.bcb.pix",
                        "qr_code_base64": "iVBORw0KGgo=",
                        "ticket_url": "https://www.mercadopago.com.br/payments/1319283746/ticket"
                    }
                }
            })))
            .mount(&server)
            .await;

        let request = DirectChargeRequest {
            transaction_amount: dec!(250.50),
            description: "Pacote de inscrições - PKG-20250114-ABC123".into(),
            payer: payer(),
            external_reference: "PKG-20250114-ABC123".into(),
            notification_url: "https://app.example/webhook/mercadopago".into(),
        };

        let charge = processor(&server).create_direct_charge(&request).await.unwrap();

        assert_eq!(charge.id, "1319283746");
        assert_eq!(charge.status, ProcessorPaymentStatus::Pending);
        assert_eq!(charge.qr_code.as_deref(), Some("00020126580014br.gov.bcb.pix"));
    }

    #[tokio::test]
    async fn test_get_payment() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payments/1319283746"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 1319283746u64,
                "status": "approved",
                "external_reference": "PKG-20250114-ABC123",
                "transaction_amount": 250.5
            })))
            .mount(&server)
            .await;

        let payment = processor(&server).get_payment("1319283746").await.unwrap();

        assert_eq!(payment.id, "1319283746");
        assert_eq!(payment.status, ProcessorPaymentStatus::Approved);
        assert_eq!(payment.external_reference.as_deref(), Some("PKG-20250114-ABC123"));
        assert_eq!(payment.amount, Some(dec!(250.50)));
    }

    #[tokio::test]
    async fn test_api_errors_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payments/404404"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "message": "Payment not found",
                "error": "not_found",
                "status": 404
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/payments/500500"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .mount(&server)
            .await;

        let processor = processor(&server);

        let err = processor.get_payment("404404").await.unwrap_err();
        assert_eq!(
            err,
            ProcessorError::Api {
                provider: "mercadopago".into(),
                status: 404,
                message: "Payment not found".into()
            }
        );
        assert!(!err.is_retryable());

        let err = processor.get_payment("500500").await.unwrap_err();
        assert!(matches!(err, ProcessorError::Api { status: 500, ref message, .. } if message == "upstream exploded"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_malformed_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payments/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let err = processor(&server).get_payment("1").await.unwrap_err();
        assert!(matches!(err, ProcessorError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_client_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payments/1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": 1, "status": "approved"}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let config = MercadoPagoConfig::new("TEST-token")
            .with_api_base_url(server.uri())
            .with_timeout(Duration::from_millis(50));
        let processor = MercadoPagoProcessor::new(config).unwrap();

        let err = processor.get_payment("1").await.unwrap_err();
        assert!(matches!(err, ProcessorError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_non_numeric_payment_id_is_not_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1, "status": "approved"})))
            .expect(0)
            .mount(&server)
            .await;

        let processor = processor(&server);
        for id in ["../users/me", "123?x=1", "12/34", ""] {
            let err = processor.get_payment(id).await.unwrap_err();
            assert!(matches!(err, ProcessorError::InvalidRequest(_)), "{id}");
            assert!(!err.is_retryable());
        }
    }
}
