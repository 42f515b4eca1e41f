#![cfg(feature = "test-utils")]

use std::sync::Arc;

use sql_batcher::prelude::*;
use sql_batcher::test_utils::{setup_postgres_embedded, stop_postgres_embedded};
use tokio::runtime::Runtime;

const STATEMENTS: &str = r#"[
    {"namespace": "users", "name": "insert", "command": "insert",
     "sql": "INSERT INTO users (name, score) VALUES (#{name}, #{score}) RETURNING id",
     "key_generator": {"kind": "read_after_execute", "properties": ["id"], "columns": ["id"]}},
    {"namespace": "users", "name": "insert_prefetched", "command": "insert",
     "sql": "INSERT INTO users (id, name, score) VALUES (#{id}, #{name}, #{score})",
     "key_generator": {"kind": "pre_fetch", "sql": "SELECT nextval('users_id_seq')", "property": "id"}},
    {"namespace": "users", "name": "set_score", "command": "update",
     "sql": "UPDATE users SET score = #{score} WHERE name = #{name}"},
    {"namespace": "users", "name": "count", "command": "select",
     "sql": "SELECT COUNT(*) AS n FROM users"},
    {"namespace": "users", "name": "all", "command": "select",
     "sql": "SELECT id, name, score FROM users ORDER BY id", "fetch_size": 2},
    {"namespace": "slow", "name": "sleep", "command": "select",
     "sql": "SELECT pg_sleep(5)", "timeout_ms": 200},
    {"namespace": "slow", "name": "insert_sleep", "command": "insert",
     "sql": "INSERT INTO users (name, score) SELECT CAST(#{name} AS TEXT), 0 FROM pg_sleep(5)",
     "timeout_ms": 200}
]"#;

fn id(qualified: &str) -> StatementId {
    StatementId::parse(qualified).unwrap()
}

fn user(name: &str, score: i64) -> ParamObject {
    ParamObject::new().with("name", name).with("score", score)
}

async fn count(executor: &mut BatchExecutor<PostgresTransaction>) -> i64 {
    let rows = executor
        .submit_query(&id("users.count"), &ParamObject::new(), RawRows)
        .await
        .unwrap();
    *rows[0].get("n").and_then(RowValues::as_int).unwrap()
}

#[test]
fn postgres_batches_keys_and_failures() -> Result<(), Box<dyn std::error::Error>> {
    let embedded = setup_postgres_embedded("sql_batcher_test")?;
    let options = embedded.options.clone();
    let rt = Runtime::new()?;
    let outcome = rt.block_on(async move {
        let pool = PostgresOptionsBuilder::new()
            .dbname(options.dbname.clone().unwrap_or_default())
            .host(options.host.clone().unwrap_or_default())
            .port(options.port.unwrap_or(5432))
            .user(options.user.clone().unwrap_or_default())
            .password(options.password.clone().unwrap_or_default())
            .pool_size(2)
            .build()
            .await?;
        {
            let conn = pool.get().await.map_err(|e| e.to_string())?;
            conn.batch_execute(
                "CREATE TABLE users (id SERIAL PRIMARY KEY, name TEXT NOT NULL UNIQUE, score BIGINT NOT NULL);",
            )
            .await?;
        }
        let configuration = Arc::new(
            Configuration::builder(DatabaseType::Postgres)
                .statements_json(STATEMENTS)
                .finish()?,
        );

        // Keys come back by execution order.
        let mut executor = BatchExecutor::new(
            Arc::clone(&configuration),
            PostgresTransaction::from_pool(pool.clone()),
        );
        let params: Vec<_> = ["a", "b", "c"].iter().map(|n| user(n, 1)).collect();
        for p in &params {
            executor.submit_update(&id("users.insert"), p).await?;
        }
        executor
            .submit_update(&id("users.set_score"), &user("b", 9))
            .await?;
        let results = executor.commit(true).await?;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].update_counts(), &[1, 1, 1]);
        let ids: Vec<_> = params.iter().map(|p| p.get("id")).collect();
        assert_eq!(
            ids,
            vec![
                Some(RowValues::Int(1)),
                Some(RowValues::Int(2)),
                Some(RowValues::Int(3))
            ]
        );
        executor.close(false).await?;

        // Pre-fetched keys run one at a time.
        let mut executor = BatchExecutor::new(
            Arc::clone(&configuration),
            PostgresTransaction::from_pool(pool.clone()),
        );
        let d = user("d", 4);
        let outcome = executor
            .submit_update(&id("users.insert_prefetched"), &d)
            .await?;
        assert_eq!(outcome, UpdateOutcome::Executed(1));
        assert_eq!(d.get("id"), Some(RowValues::Int(4)));

        // Streaming reads the committed and the pending rows.
        let mut cursor = executor
            .submit_streaming_query(&id("users.all"), &ParamObject::new())
            .await?;
        let mut seen = 0;
        while let Some(row) = cursor.next().await {
            row?;
            seen += 1;
        }
        drop(cursor);
        assert_eq!(seen, 4);
        assert_eq!(executor.transaction().open_handles(), 0);

        // Timeouts cancel the running statement.
        let err = executor
            .submit_query(&id("slow.sleep"), &ParamObject::new(), RawRows)
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "unexpected error: {err}");
        executor.close(true).await?;

        // A deadline expiring during a flush fails the group with only confirmed counts.
        let mut executor = BatchExecutor::new(
            Arc::clone(&configuration),
            PostgresTransaction::from_pool(pool.clone()),
        );
        executor.submit_update(&id("users.insert"), &user("h", 0)).await?;
        executor
            .submit_update(&id("slow.insert_sleep"), &ParamObject::new().with("name", "zz"))
            .await?;
        let err = executor.flush(false).await.unwrap_err();
        let failure = err.as_batch_failure().expect("batch failure");
        assert!(failure.cause().is_timeout(), "unexpected cause: {}", failure.cause());
        assert_eq!(failure.batch_index(), 2);
        assert_eq!(failure.successful_results()[0].update_counts(), &[1]);
        assert!(failure.failed_result().update_counts().is_empty());
        assert_eq!(executor.transaction().open_handles(), 0);
        executor.rollback(true).await?;

        // A cursor whose query outlives its deadline reports a timeout instead of waiting.
        let mut cursor = executor
            .submit_streaming_query(&id("slow.sleep"), &ParamObject::new())
            .await?;
        let first = tokio::time::timeout(std::time::Duration::from_secs(3), cursor.next()).await?;
        let err = first.expect("an error instead of the end of rows").unwrap_err();
        assert!(err.is_timeout(), "unexpected error: {err}");
        drop(cursor);
        assert_eq!(executor.transaction().open_handles(), 0);
        executor.close(true).await?;

        // A unique violation stops the third group after its first statement.
        let mut executor = BatchExecutor::new(
            Arc::clone(&configuration),
            PostgresTransaction::from_pool(pool.clone()),
        );
        executor.submit_update(&id("users.insert"), &user("e", 0)).await?;
        executor
            .submit_update(&id("users.set_score"), &user("e", 1))
            .await?;
        for name in ["f", "a", "g"] {
            executor.submit_update(&id("users.insert"), &user(name, 0)).await?;
        }
        let err = executor.flush(false).await.unwrap_err();
        let failure = err.as_batch_failure().expect("batch failure");
        assert_eq!(failure.batch_index(), 3);
        assert_eq!(failure.successful_results().len(), 2);
        assert_eq!(failure.failed_result().update_counts(), &[1]);
        assert_eq!(executor.transaction().open_handles(), 0);
        executor.rollback(true).await?;
        executor.close(false).await?;

        let mut verify =
            BatchExecutor::new(configuration, PostgresTransaction::from_pool(pool));
        assert_eq!(count(&mut verify).await, 3);
        verify.close(false).await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    });
    stop_postgres_embedded(embedded);
    outcome
}
