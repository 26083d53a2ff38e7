use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use microcloud_common::{
    DeployTarget, Instance, InstanceStatus, IpMapping, MetricSample, Node, Plan, PortMapping,
    SubscriptionStatus, UserLog, Vcpu,
};

use crate::types::{DeploymentGrant, InstanceRecord, NewInstance, Store, StoreError};

#[derive(Debug, Clone)]
pub struct PgStoreConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PgStoreConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/microcloud".to_string(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(cfg: &PgStoreConfig) -> Result<Self, StoreError> {
        tracing::info!(max_connections = cfg.max_connections, "connecting to database");
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .acquire_timeout(cfg.acquire_timeout)
            .connect(&cfg.database_url)
            .await?;
        Ok(Self { pool })
    }
}

fn to_u16(table: &'static str, column: &str, v: i32) -> Result<u16, StoreError> {
    u16::try_from(v).map_err(|_| StoreError::InvalidRow {
        table,
        reason: format!("{column}={v} is not a valid port"),
    })
}

fn instance_from_row(row: &PgRow) -> Result<Instance, StoreError> {
    let status: String = row.try_get("status")?;
    let status = match status.as_str() {
        "Running" => InstanceStatus::Running,
        other => {
            return Err(StoreError::InvalidRow {
                table: "instances",
                reason: format!("unknown status {other:?}"),
            })
        }
    };
    Ok(Instance {
        id: row.try_get("id")?,
        plan_id: row.try_get("plan_id")?,
        subscription_id: row.try_get("subscription_id")?,
        node_id: row.try_get("node_id")?,
        status,
        workload_handle: row.try_get("container_id")?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn plan(&self, plan_id: i64) -> Result<Option<Plan>, StoreError> {
        let row = sqlx::query("SELECT id, vcpu::float8 AS vcpu, ram FROM plans WHERE id = $1")
            .bind(plan_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let vcpu: f64 = row.try_get("vcpu")?;
        let ram: i32 = row.try_get("ram")?;
        let vcpu = Vcpu::from_cores(vcpu).map_err(|e| StoreError::InvalidRow {
            table: "plans",
            reason: e.to_string(),
        })?;
        let ram_mib = u32::try_from(ram).map_err(|_| StoreError::InvalidRow {
            table: "plans",
            reason: format!("ram={ram} is negative"),
        })?;

        Ok(Some(Plan {
            id: row.try_get("id")?,
            vcpu,
            ram_mib,
        }))
    }

    async fn deploy_target(&self, email: &str) -> Result<Option<DeployTarget>, StoreError> {
        let row = sqlx::query("SELECT plan_id, sub_id, region_id FROM deploy_view WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(DeployTarget {
                plan_id: row.try_get("plan_id")?,
                subscription_id: row.try_get("sub_id")?,
                region_id: row.try_get("region_id")?,
            })
        })
        .transpose()
    }

    async fn nodes_in_region(&self, region_id: i64) -> Result<Vec<Node>, StoreError> {
        let rows = sqlx::query("SELECT id, ip, region_id, ssh_port FROM nodes WHERE region_id = $1")
            .bind(region_id)
            .fetch_all(&self.pool)
            .await?;

        let mut nodes = Vec::with_capacity(rows.len());
        for row in rows {
            let ssh_port: Option<i32> = row.try_get("ssh_port")?;
            nodes.push(Node {
                id: row.try_get("id")?,
                ip: row.try_get("ip")?,
                region: row.try_get("region_id")?,
                ssh_port: ssh_port
                    .map(|p| to_u16("nodes", "ssh_port", p))
                    .transpose()?,
            });
        }
        Ok(nodes)
    }

    async fn record_instance(&self, new: &NewInstance) -> Result<InstanceRecord, StoreError> {
        // Dropping `tx` without commit rolls back every insert below.
        let mut tx = self.pool.begin().await?;

        let instance_id: i64 = sqlx::query(
            r#"
            INSERT INTO instances (plan_id, subscription_id, node_id, status, container_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(new.plan_id)
        .bind(new.subscription_id)
        .bind(new.node_id)
        .bind(InstanceStatus::Running.as_str())
        .bind(&new.workload_handle)
        .fetch_one(&mut *tx)
        .await?
        .try_get("id")?;

        let mut port_mappings = Vec::with_capacity(microcloud_common::PORTS_PER_INSTANCE);
        for (external, internal) in new.port_plan.pairs() {
            sqlx::query(
                "INSERT INTO port_mappings (external_port, internal_port, instance_id) VALUES ($1, $2, $3)",
            )
            .bind(i32::from(external))
            .bind(i32::from(internal))
            .bind(instance_id)
            .execute(&mut *tx)
            .await?;
            port_mappings.push(PortMapping {
                external_port: external,
                internal_port: internal,
                instance_id,
            });
        }

        sqlx::query(
            "INSERT INTO ip_mappings (external_ip, internal_ip, instance_id) VALUES ($1, $2, $3)",
        )
        .bind(&new.external_address)
        .bind(new.internal_address.as_deref())
        .bind(instance_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(InstanceRecord {
            instance: Instance {
                id: instance_id,
                plan_id: new.plan_id,
                subscription_id: new.subscription_id,
                node_id: new.node_id,
                status: InstanceStatus::Running,
                workload_handle: new.workload_handle.clone(),
            },
            port_mappings,
            ip_mapping: IpMapping {
                external_address: new.external_address.clone(),
                internal_address: new.internal_address.clone(),
                instance_id,
            },
        })
    }

    async fn record_deployment(&self, grant: &DeploymentGrant) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO ssh_details (ip_addr, tcp_port, psswd) VALUES ($1, $2, $3)")
            .bind(&grant.ssh.address)
            .bind(i32::from(grant.ssh.port))
            .bind(&grant.ssh.credential)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE subscriptions SET status = $1 WHERE id = $2")
            .bind(SubscriptionStatus::Active.as_str())
            .bind(grant.subscription_id)
            .execute(&mut *tx)
            .await?;

        let customer_id: i64 = sqlx::query("SELECT customer_id FROM subscriptions WHERE id = $1")
            .bind(grant.subscription_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::not_found("subscription", grant.subscription_id))?
            .try_get("customer_id")?;

        sqlx::query("INSERT INTO user_logs (event_type, customer_id, timestamp) VALUES ($1, $2, $3)")
            .bind(UserLog::INSTANCE_GRANTED)
            .bind(customer_id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(customer_id)
    }

    async fn list_instances(&self) -> Result<Vec<Instance>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, plan_id, subscription_id, node_id, status, container_id FROM instances",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(instance_from_row).collect()
    }

    async fn append_metrics(&self, samples: &[MetricSample]) -> Result<u64, StoreError> {
        if samples.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;
        for s in samples {
            let pids = i32::try_from(s.pids).unwrap_or(i32::MAX);
            let res = sqlx::query(
                r#"
                INSERT INTO instance_metrics
                    (instance_id, container_id, cpu_percent, mem_usage, mem_percent, net_io, block_io, pids)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(s.instance_id)
            .bind(&s.workload_id)
            .bind(s.cpu_percent)
            .bind(s.memory_usage_mib)
            .bind(s.memory_percent)
            .bind(&s.net_io)
            .bind(&s.block_io)
            .bind(pids)
            .execute(&mut *tx)
            .await?;
            written += res.rows_affected();
        }
        tx.commit().await?;
        Ok(written)
    }
}

/// These run against a throwaway schema on the server named by `DATABASE_URL`:
/// `DATABASE_URL=postgres://... cargo test -p microcloud-store -- --ignored`
#[cfg(test)]
mod tests {
    use super::*;
    use microcloud_common::{PortPlan, SshDetails};

    const SEED: &str = r#"
        INSERT INTO plans (id, vcpu, ram) VALUES (1, 1.0, 512);
        INSERT INTO nodes (id, ip, region_id) VALUES (1, '10.0.0.1', 1);
        INSERT INTO customers (id, email) VALUES (900, 'ada@example.com');
        INSERT INTO subscriptions (id, customer_id, plan_id, region_id) VALUES (41, 900, 1, 1);
    "#;

    struct Scratch {
        admin: PgStore,
        store: PgStore,
        schema: String,
    }

    impl Scratch {
        async fn new(name: &str) -> Self {
            let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
            let schema = format!("microcloud_{name}_{}", std::process::id());
            let admin = PgStore::connect(&PgStoreConfig {
                database_url: url.clone(),
                max_connections: 1,
                ..PgStoreConfig::default()
            })
            .await
            .unwrap();
            let create = format!("DROP SCHEMA IF EXISTS {schema} CASCADE; CREATE SCHEMA {schema};");
            sqlx::raw_sql(&create).execute(&admin.pool).await.unwrap();

            let sep = if url.contains('?') { '&' } else { '?' };
            let store = PgStore::connect(&PgStoreConfig {
                database_url: format!("{url}{sep}options=-c%20search_path%3D{schema}"),
                max_connections: 2,
                ..PgStoreConfig::default()
            })
            .await
            .unwrap();
            sqlx::raw_sql(include_str!("../sql/schema.sql"))
                .execute(&store.pool)
                .await
                .unwrap();
            sqlx::raw_sql(SEED).execute(&store.pool).await.unwrap();
            Self {
                admin,
                store,
                schema,
            }
        }

        async fn exec(&self, sql: &str) {
            sqlx::raw_sql(sql).execute(&self.store.pool).await.unwrap();
        }

        async fn count(&self, table: &str) -> i64 {
            let sql = format!("SELECT count(*) AS n FROM {table}");
            sqlx::query(&sql)
                .fetch_one(&self.store.pool)
                .await
                .unwrap()
                .get("n")
        }

        async fn subscription_status(&self, id: i64) -> String {
            sqlx::query("SELECT status FROM subscriptions WHERE id = $1")
                .bind(id)
                .fetch_one(&self.store.pool)
                .await
                .unwrap()
                .get("status")
        }

        async fn cleanup(self) {
            self.store.pool.close().await;
            let sql = format!("DROP SCHEMA {} CASCADE", self.schema);
            sqlx::raw_sql(&sql).execute(&self.admin.pool).await.unwrap();
        }
    }

    fn new_instance(external_address: &str) -> NewInstance {
        NewInstance {
            plan_id: 1,
            subscription_id: 41,
            node_id: 1,
            workload_handle: "3f2a9c1b7d4e".to_string(),
            port_plan: PortPlan::new([10001, 10002, 10003, 10004, 10005]).unwrap(),
            external_address: external_address.to_string(),
            internal_address: Some("172.17.0.2".to_string()),
        }
    }

    fn grant(subscription_id: i64) -> DeploymentGrant {
        DeploymentGrant {
            subscription_id,
            ssh: SshDetails {
                address: "203.0.113.5".into(),
                port: 10423,
                credential: "Ab3xT9pL2q0Z".into(),
            },
        }
    }

    #[tokio::test]
    #[ignore = "needs a Postgres server in DATABASE_URL"]
    async fn test_record_instance_commits_six_rows() {
        let db = Scratch::new("record_instance").await;
        let rec = db.store.record_instance(&new_instance("203.0.113.5")).await.unwrap();

        assert_eq!(db.count("instances").await, 1);
        assert_eq!(db.count("port_mappings").await, 5);
        assert_eq!(db.count("ip_mappings").await, 1);
        let listed = db.store.list_instances().await.unwrap();
        assert_eq!(listed, vec![rec.instance]);
        db.cleanup().await;
    }

    #[tokio::test]
    #[ignore = "needs a Postgres server in DATABASE_URL"]
    async fn test_record_instance_rolls_back_on_late_failure() {
        let db = Scratch::new("instance_rollback").await;
        // Fails the last insert, after the instance and port rows are written.
        db.exec("ALTER TABLE ip_mappings ADD CONSTRAINT reject_ip CHECK (external_ip <> 'reject')")
            .await;

        let res = db.store.record_instance(&new_instance("reject")).await;
        assert!(matches!(res, Err(StoreError::Database(_))));
        assert_eq!(db.count("instances").await, 0);
        assert_eq!(db.count("port_mappings").await, 0);
        assert_eq!(db.count("ip_mappings").await, 0);
        db.cleanup().await;
    }

    #[tokio::test]
    #[ignore = "needs a Postgres server in DATABASE_URL"]
    async fn test_record_deployment_commits_grant() {
        let db = Scratch::new("deployment").await;
        let customer = db.store.record_deployment(&grant(41)).await.unwrap();

        assert_eq!(customer, 900);
        assert_eq!(db.count("ssh_details").await, 1);
        assert_eq!(db.count("user_logs").await, 1);
        assert_eq!(db.subscription_status(41).await, "Active");
        db.cleanup().await;
    }

    #[tokio::test]
    #[ignore = "needs a Postgres server in DATABASE_URL"]
    async fn test_record_deployment_missing_subscription_rolls_back() {
        let db = Scratch::new("deployment_missing").await;
        let res = db.store.record_deployment(&grant(99)).await;

        assert!(matches!(res, Err(StoreError::NotFound { .. })));
        assert_eq!(db.count("ssh_details").await, 0);
        assert_eq!(db.count("user_logs").await, 0);
        db.cleanup().await;
    }

    #[tokio::test]
    #[ignore = "needs a Postgres server in DATABASE_URL"]
    async fn test_record_deployment_rolls_back_on_log_failure() {
        let db = Scratch::new("deployment_rollback").await;
        db.exec("ALTER TABLE user_logs ADD CONSTRAINT reject_customer CHECK (customer_id <> 900)")
            .await;

        let res = db.store.record_deployment(&grant(41)).await;
        assert!(matches!(res, Err(StoreError::Database(_))));
        assert_eq!(db.count("ssh_details").await, 0);
        assert_eq!(db.count("user_logs").await, 0);
        assert_eq!(db.subscription_status(41).await, "Pending");
        db.cleanup().await;
    }
}
