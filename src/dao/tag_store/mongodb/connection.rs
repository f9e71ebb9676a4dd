use std::time::Duration;

use mongodb::{Client, Database, bson::doc};
use tokio::time::sleep;

use super::{
    config::MongoConfig,
    error::{MongoDaoError, MongoResult},
};

const PING_ATTEMPTS: u32 = 10;
const PING_INITIAL_DELAY: Duration = Duration::from_millis(250);
const PING_MAX_DELAY: Duration = Duration::from_secs(5);

/// Build a client from the configuration and wait until the deployment
/// answers a ping, backing off between attempts.
pub async fn establish_connection(config: &MongoConfig) -> MongoResult<(Client, Database)> {
    let client = Client::with_options(config.options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(&config.database_name);

    let mut attempts = 0;
    let mut delay = PING_INITIAL_DELAY;
    loop {
        match database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => return Ok((client, database)),
            Err(source) => {
                attempts += 1;
                if attempts >= PING_ATTEMPTS {
                    return Err(MongoDaoError::InitialPing { attempts, source });
                }
                sleep(delay).await;
                delay = (delay * 2).min(PING_MAX_DELAY);
            }
        }
    }
}
