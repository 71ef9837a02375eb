use std::env;
use std::time::Duration;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_expiration_hours: i64,
    pub server_host: String,
    pub server_port: u16,
    pub firebase: Option<FirebaseConfig>,
    pub google_maps_api_key: Option<String>,
    /// JSON file of known road legs, used when there is no Maps key
    pub route_table_path: Option<String>,
    pub payment_webhook_secret: String,
    pub seat_lock_ttl_secs: i64,
    pub service_fee: i64,
    pub upstream_timeout_secs: u64,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

#[derive(Clone)]
pub struct FirebaseConfig {
    pub project_id: String,
    pub client_email: Option<String>,
    pub private_key: Option<String>,
}

/// Admin accounts are provisioned by hand, never through the API
#[derive(Clone)]
pub struct BootstrapAdmin {
    pub uid: String,
    pub email: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let firebase = env::var("FIREBASE_PROJECT_ID").ok().map(|project_id| FirebaseConfig {
            project_id,
            client_email: env::var("FIREBASE_CLIENT_EMAIL").ok(),
            // Keys pasted into .env usually carry escaped newlines
            private_key: env::var("FIREBASE_PRIVATE_KEY")
                .ok()
                .map(|key| key.replace("\\n", "\n")),
        });

        let bootstrap_admin = match (env::var("ADMIN_UID"), env::var("ADMIN_EMAIL")) {
            (Ok(uid), Ok(email)) => Some(BootstrapAdmin { uid, email }),
            _ => None,
        };

        Self {
            database_url: env::var("DATABASE_URL")
                .expect("DATABASE_URL must be set"),
            jwt_secret: env::var("JWT_SECRET")
                .expect("JWT_SECRET must be set"),
            jwt_expiration_hours: env::var("JWT_EXPIRATION_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .expect("JWT_EXPIRATION_HOURS must be a number"),
            server_host: env::var("SERVER_HOST")
                .unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .expect("SERVER_PORT must be a number"),
            firebase,
            google_maps_api_key: env::var("GOOGLE_MAPS_API_KEY").ok(),
            route_table_path: env::var("ROUTE_TABLE_PATH").ok(),
            payment_webhook_secret: env::var("PAYMENT_WEBHOOK_SECRET")
                .expect("PAYMENT_WEBHOOK_SECRET must be set"),
            seat_lock_ttl_secs: env::var("SEAT_LOCK_TTL_SECS")
                .unwrap_or_else(|_| "600".to_string())
                .parse()
                .expect("SEAT_LOCK_TTL_SECS must be a number"),
            service_fee: env::var("SERVICE_FEE")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .expect("SERVICE_FEE must be a number"),
            upstream_timeout_secs: env::var("UPSTREAM_TIMEOUT_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .expect("UPSTREAM_TIMEOUT_SECS must be a number"),
            bootstrap_admin,
        }
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn seat_lock_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.seat_lock_ttl_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    /// Settings for tests and local tooling; nothing is read from the environment
    pub fn for_tests() -> Self {
        Self {
            database_url: "postgres://localhost/quickseat_test".to_string(),
            jwt_secret: "test-secret".to_string(),
            jwt_expiration_hours: 1,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            firebase: None,
            google_maps_api_key: None,
            route_table_path: None,
            payment_webhook_secret: "webhook-secret".to_string(),
            seat_lock_ttl_secs: 600,
            service_fee: 50,
            upstream_timeout_secs: 5,
            bootstrap_admin: None,
        }
    }
}
