use argus_redis::{RedisBackend, RedisConfig};
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage};

/// Spins up a Redis container and returns its connection URL.
///
/// The `ContainerAsync` must be kept in scope for the test duration;
/// dropping it stops the container.
pub async fn start_redis() -> (String, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("redis", "7")
        .with_exposed_port(ContainerPort::Tcp(6379))
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
        .start()
        .await
        .expect("Failed to start Redis container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("Failed to get port");

    (format!("redis://{host}:{port}"), container)
}

/// Connect, retrying until the container is fully ready.
pub async fn connect_with_retry(config: &RedisConfig) -> RedisBackend {
    const MAX_RETRIES: u32 = 30;
    let mut retries = 0;
    loop {
        match RedisBackend::connect(config).await {
            Ok(backend) => break backend,
            Err(e) => {
                retries += 1;
                if retries >= MAX_RETRIES {
                    panic!("Failed to connect to Redis after {MAX_RETRIES} retries: {e}");
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}

/// Container plus a connected backend with default configuration.
pub async fn setup_redis() -> (RedisBackend, ContainerAsync<GenericImage>) {
    let (url, container) = start_redis().await;
    let backend = connect_with_retry(&RedisConfig::new(url)).await;
    (backend, container)
}
