//! Attaching databases to a host.
//!
//! [`register`] (or [`register_with`] for a custom driver) builds the pool,
//! adds the database to the host's registry and installs two hooks: one
//! that closes the pool when the host shuts down, and one that opts marked
//! routes into request transactions.

mod binder;

use crate::config::DatabaseConfig;
use crate::db::database::Database;
use crate::db::driver::Driver;
use crate::db::pool::{DbPool, SqlxDriver};
use crate::error::{DbError, DbResult};
use crate::models::masked_connection_string;
use crate::server::Host;
use tracing::{info, warn};

/// Register a database on `host` using the sqlx driver.
pub fn register(host: &mut Host<DbPool>, config: DatabaseConfig) -> DbResult<Database<DbPool>> {
    register_with(host, &SqlxDriver, config)
}

/// Register every configuration in order, stopping at the first failure.
pub fn register_all(
    host: &mut Host<DbPool>,
    configs: impl IntoIterator<Item = DatabaseConfig>,
) -> DbResult<Vec<Database<DbPool>>> {
    configs
        .into_iter()
        .map(|config| register(host, config))
        .collect()
}

/// Register a database on `host` using `driver`.
///
/// The name is checked before any pool is created. When `config.native` is
/// set and the driver has no native variant, a warning is logged and the
/// driver itself is used.
pub fn register_with<D: Driver>(
    host: &mut Host<D::Pool>,
    driver: &D,
    config: DatabaseConfig,
) -> DbResult<Database<D::Pool>> {
    let name = config.name.as_deref().filter(|n| !n.is_empty());
    host.registry().ensure_available(name)?;
    config
        .pool_options
        .validate()
        .map_err(DbError::invalid_input)?;

    let (pool, driver_name) = if config.native {
        match driver.native() {
            Some(native) => (native.create_pool(&config)?, native.name()),
            None => {
                warn!(
                    database = %config.display_name(),
                    driver = driver.name(),
                    "native driver not available, falling back to the default driver"
                );
                (driver.create_pool(&config)?, driver.name())
            }
        }
    } else {
        (driver.create_pool(&config)?, driver.name())
    };

    let database = Database::new(name, pool);
    host.registry_mut().register(database.clone())?;

    let closing = database.clone();
    host.add_on_close(move || async move { closing.close().await });
    host.add_on_route(binder::route_hook(database.clone()));

    info!(
        database = %database.display_name(),
        driver = driver_name,
        url = %masked_connection_string(&config.connection_string),
        "Database registered"
    );
    Ok(database)
}
