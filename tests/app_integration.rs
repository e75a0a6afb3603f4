use rates_bot::bot::{Bot, CONVERT_CALLBACK, Incoming};
use rates_bot::core::RateService;
use rates_bot::core::refresh::{RefreshOutcome, Refresher};
use rates_bot::core::session::{ConversationId, SessionStore};
use rates_bot::core::store::RateStore;
use rates_bot::providers::cbr::CbrRateSource;
use rates_bot::store::memory::MemoryRateStore;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const DAILY_XML: &str = r#"<?xml version="1.0" encoding="windows-1251"?>
<ValCurs Date="17.10.2026" name="Foreign Currency Market">
    <Valute ID="R01235">
        <NumCode>840</NumCode>
        <CharCode>USD</CharCode>
        <Nominal>1</Nominal>
        <Name>US Dollar</Name>
        <Value>90,0000</Value>
        <VunitRate>90</VunitRate>
    </Valute>
    <Valute ID="R01239">
        <NumCode>978</NumCode>
        <CharCode>EUR</CharCode>
        <Nominal>1</Nominal>
        <Name>Euro</Name>
        <Value>100,0000</Value>
        <VunitRate>100</VunitRate>
    </Valute>
    <Valute ID="R01820">
        <NumCode>392</NumCode>
        <CharCode>JPY</CharCode>
        <Nominal>100</Nominal>
        <Name>Yen</Name>
        <Value>60,0000</Value>
        <VunitRate>0,6</VunitRate>
    </Valute>
</ValCurs>"#;

mod test_utils {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub const RATES_PATH: &str = "/scripts/XML_daily.asp";

    pub async fn create_rates_server(status: u16, body: &str) -> MockServer {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(RATES_PATH))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&mock_server)
            .await;

        mock_server
    }
}

fn refresher_for(url: &str, store: &MemoryRateStore) -> Refresher {
    let source = CbrRateSource::new(url, Duration::from_secs(5)).expect("client");
    Refresher::new(Arc::new(source), Arc::new(store.clone()), "RUB")
}

#[test_log::test(tokio::test)]
async fn test_refresh_then_convert_through_bot() {
    let mock_server = test_utils::create_rates_server(200, DAILY_XML).await;
    let url = format!("{}{}", mock_server.uri(), test_utils::RATES_PATH);
    let store = MemoryRateStore::new();

    let outcome = refresher_for(&url, &store).refresh().await.unwrap();
    assert_eq!(outcome, RefreshOutcome::Updated { entries: 4 });
    info!(?outcome, "Refresh finished");

    let bot = Bot::new(
        RateService::new(Arc::new(store.clone())),
        SessionStore::new(),
    );
    let user = ConversationId {
        chat_id: 1,
        user_id: 1,
    };

    let reply = bot
        .handle(user, Incoming::Text("/exchange USD EUR 10".to_string()))
        .await;
    assert_eq!(reply.text, "10 USD = 9.00 EUR");

    let reply = bot
        .handle(user, Incoming::Callback(CONVERT_CALLBACK.to_string()))
        .await;
    let codes: Vec<String> = reply
        .keyboard
        .expect("currency keyboard")
        .into_iter()
        .flatten()
        .map(|button| button.text)
        .collect();
    assert_eq!(codes, vec!["EUR", "JPY", "RUB", "USD"]);

    bot.handle(user, Incoming::Callback("from_currency:JPY".to_string()))
        .await;
    bot.handle(user, Incoming::Callback("to_currency:RUB".to_string()))
        .await;
    let reply = bot.handle(user, Incoming::Text("1000".to_string())).await;
    assert_eq!(reply.text, "1000 JPY = 600.00 RUB");

    let reply = bot.handle(user, Incoming::Text("/rates".to_string())).await;
    assert_eq!(
        reply.text,
        "EUR: 100.00\nJPY: 0.60\nRUB: 1.00\nUSD: 90.00"
    );
}

#[test_log::test(tokio::test)]
async fn test_failed_refresh_keeps_previous_rates() {
    let store = MemoryRateStore::with_rates([("RUB", 1.0), ("USD", 88.0)]);

    let broken = test_utils::create_rates_server(200, "<ValCurs><Valute>").await;
    let url = format!("{}{}", broken.uri(), test_utils::RATES_PATH);
    assert!(refresher_for(&url, &store).refresh().await.is_err());

    let down = test_utils::create_rates_server(500, "").await;
    let url = format!("{}{}", down.uri(), test_utils::RATES_PATH);
    assert!(refresher_for(&url, &store).refresh().await.is_err());

    assert_eq!(store.get("USD").await.unwrap(), Some(88.0));
    assert_eq!(store.list_keys().await.unwrap().len(), 2);
}

#[test_log::test(tokio::test)]
async fn test_cli_commands_with_memory_store() {
    let mock_server = test_utils::create_rates_server(200, DAILY_XML).await;

    let config_file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
    let config_path = config_file.path();
    let config_content = format!(
        r#"
        source:
          url: "{}{}"
          timeout_secs: 5
    "#,
        mock_server.uri(),
        test_utils::RATES_PATH
    );
    fs::write(config_path, &config_content).expect("Failed to write config file");
    let config_path = config_path.to_str().unwrap();

    let result = rates_bot::run_command(rates_bot::AppCommand::Refresh, Some(config_path), true).await;
    assert!(result.is_ok(), "Refresh failed with: {:?}", result.err());

    let result = rates_bot::run_command(rates_bot::AppCommand::Rates, Some(config_path), true).await;
    assert!(result.is_ok(), "Rates failed with: {:?}", result.err());

    let result = rates_bot::run_command(
        rates_bot::AppCommand::Convert {
            from: "usd".to_string(),
            to: "eur".to_string(),
            amount: "10".to_string(),
        },
        Some(config_path),
        true,
    )
    .await;
    assert!(result.is_ok(), "Convert failed with: {:?}", result.err());

    let result = rates_bot::run_command(
        rates_bot::AppCommand::Convert {
            from: "USD".to_string(),
            to: "XXX".to_string(),
            amount: "10".to_string(),
        },
        Some(config_path),
        true,
    )
    .await;
    assert!(result.is_err());
    assert_eq!(result.unwrap_err().to_string(), "Unknown currency: XXX");
}
