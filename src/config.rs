#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub app_url: String,
    pub api_base_url: String,
    pub jwt_secret: String,
    pub jwt_maxage: i64,
    pub port: u16,
    // Payment gateway configuration
    pub active_payment_gateway: String,
    pub payfast_merchant_id: String,
    pub payfast_merchant_key: String,
    pub payfast_passphrase: Option<String>,
    pub payfast_mode: String,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
}

impl Config {
    pub fn init() -> Config {
        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let jwt_secret = std::env::var("JWT_SECRET_KEY").expect("JWT_SECRET_KEY must be set");
        let jwt_maxage = std::env::var("JWT_MAXAGE").expect("JWT_MAXAGE must be set");
        let app_url = std::env::var("APP_URL").expect("APP_URL must be set");
        let api_base_url = std::env::var("API_BASE_URL").unwrap_or_else(|_| app_url.clone());

        // Gateway configuration (with sandbox defaults)
        let active_payment_gateway = std::env::var("ACTIVE_PAYMENT_GATEWAY")
            .unwrap_or_else(|_| "payfast".to_string());
        let payfast_merchant_id = std::env::var("PAYFAST_MERCHANT_ID")
            .unwrap_or_else(|_| "10000100".to_string());
        let payfast_merchant_key = std::env::var("PAYFAST_MERCHANT_KEY")
            .unwrap_or_else(|_| "46f0cd694581a".to_string());
        // An empty passphrase means the merchant account has none configured.
        let payfast_passphrase = std::env::var("PAYFAST_PASSPHRASE")
            .ok()
            .filter(|p| !p.trim().is_empty());
        let payfast_mode = std::env::var("PAYFAST_MODE")
            .unwrap_or_else(|_| "sandbox".to_string());
        let stripe_secret_key = std::env::var("STRIPE_SECRET_KEY")
            .unwrap_or_else(|_| "sk_test_secret".to_string());
        let stripe_webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .unwrap_or_else(|_| "whsec_test_secret".to_string());

        Config {
            database_url,
            app_url,
            api_base_url,
            jwt_secret,
            jwt_maxage: jwt_maxage.parse::<i64>().expect("JWT_MAXAGE must be a number"),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse::<u16>().ok())
                .unwrap_or(8000),
            active_payment_gateway,
            payfast_merchant_id,
            payfast_merchant_key,
            payfast_passphrase,
            payfast_mode,
            stripe_secret_key,
            stripe_webhook_secret,
        }
    }
}
