//! Conversions from library errors into `AppError`

use super::AppError;

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::ConfigParse {
            message: err.to_string(),
            line: err.location().map(|loc| loc.line()),
        }
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_dropped() || err.is_connection_refusal() || err.is_io_error() {
            Self::RedisConnection {
                message: err.to_string(),
            }
        } else {
            Self::RedisOperation {
                operation: "redis_operation".to_string(),
                message: err.to_string(),
            }
        }
    }
}

#[cfg(feature = "redis")]
impl From<deadpool_redis::PoolError> for AppError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::RedisConnection {
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "redis")]
impl From<deadpool_redis::CreatePoolError> for AppError {
    fn from(err: deadpool_redis::CreatePoolError) -> Self {
        Self::RedisConnection {
            message: format!("Failed to create Redis pool: {err}"),
        }
    }
}
