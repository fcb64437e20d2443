//! Sample operations over the `users` and `cities` collections.
//!
//! Each function performs one client call and logs what happened. The
//! demo binary runs them in sequence.

use serde_json::json;
use tracing::info;

use crate::client::DocumentClient;
use crate::document::DocumentSnapshot;
use crate::error::Result;
use crate::listener::ListenerRegistration;
use crate::path::DocumentPath;
use crate::transaction::TransactionOutcome;

pub const USERS: &str = "users";
pub const CITIES: &str = "cities";

/// Upper bound enforced by [`increment_population`].
pub const MAX_POPULATION: i64 = 1_000_000;

/// Add a user under a generated id.
pub async fn add_user(client: &DocumentClient) -> Result<DocumentPath> {
    let path = client
        .add_document(
            USERS,
            &json!({
                "first": "Alan",
                "middle": "Mathison",
                "last": "Turing",
                "born": 1912
            }),
        )
        .await?;
    info!(id = path.id(), "document added");
    Ok(path)
}

/// Log every user.
pub async fn list_users(client: &DocumentClient) -> Result<Vec<DocumentSnapshot>> {
    let users = client.list_documents(USERS).await?;
    for user in &users {
        info!(id = user.id(), data = ?user.data(), "user");
    }
    Ok(users)
}

/// Read `cities/SF`.
pub async fn get_san_francisco(client: &DocumentClient) -> Result<DocumentSnapshot> {
    let snapshot = client.get_document(CITIES, "SF").await?;
    match snapshot.data() {
        Some(data) => info!(?data, "document data"),
        None => info!("document does not exist"),
    }
    Ok(snapshot)
}

/// Overwrite `cities/LA`.
pub async fn set_los_angeles(client: &DocumentClient) -> Result<()> {
    client
        .set_document(
            CITIES,
            "LA",
            &json!({"name": "Los Angeles", "state": "CA", "country": "USA"}),
        )
        .await?;
    info!("document successfully written");
    Ok(())
}

/// Change the state of `cities/LA`. Fails if LA was never written.
pub async fn update_los_angeles(client: &DocumentClient) -> Result<()> {
    client
        .update_document(CITIES, "LA", &json!({"state": "DC"}))
        .await?;
    info!("document successfully updated");
    Ok(())
}

/// Stamp `cities/LA` with the commit time.
pub async fn touch_los_angeles(client: &DocumentClient) -> Result<()> {
    client
        .set_server_timestamp(CITIES, "LA", "lastUpdated")
        .await?;
    info!("lastUpdated set");
    Ok(())
}

/// Write `users/frank`, then update a top-level and a nested field.
pub async fn update_frank(client: &DocumentClient) -> Result<()> {
    client
        .set_document(
            USERS,
            "frank",
            &json!({
                "name": "Frank",
                "favorites": {"food": "Pizza", "color": "Blue", "subject": "recess"},
                "age": 12
            }),
        )
        .await?;
    client
        .update_document(USERS, "frank", &json!({"age": 13, "favorites.color": "Red"}))
        .await?;
    info!("document successfully updated");
    Ok(())
}

/// Add one to `population` of `cities/<key>` without exceeding [`MAX_POPULATION`].
///
/// Aborts if the field is missing, not an integer, or would exceed the bound.
pub async fn increment_population(client: &DocumentClient, key: &str) -> Result<i64> {
    let population = client
        .run_transaction(CITIES, key, |snapshot, txn| {
            let Some(old) = snapshot
                .data()
                .and_then(|data| data.get("population"))
                .and_then(|v| v.as_i64())
            else {
                return TransactionOutcome::abort(format!(
                    "unable to retrieve population from {}",
                    snapshot.path
                ));
            };

            let new = match old.checked_add(1) {
                Some(new) if new <= MAX_POPULATION => new,
                _ => return TransactionOutcome::abort(format!("population {} too big", old)),
            };
            match txn.update_field("population", new) {
                Ok(_) => TransactionOutcome::Commit(new),
                Err(e) => TransactionOutcome::abort(e.to_string()),
            }
        })
        .await?;
    info!(population, "population increased");
    Ok(population)
}

/// Delete `cities/DC`.
pub async fn delete_washington(client: &DocumentClient) -> Result<()> {
    client.delete_document(CITIES, "DC").await?;
    info!("document successfully removed");
    Ok(())
}

/// Log every state of `cities/SF` until the registration is removed.
pub async fn watch_san_francisco(client: &DocumentClient) -> Result<ListenerRegistration> {
    client
        .subscribe(CITIES, "SF", |snapshot| match snapshot.data() {
            Some(data) => info!(?data, "current data"),
            None => info!("document data was empty"),
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::error::StoreError;

    fn client() -> DocumentClient {
        DocumentClient::in_memory(ClientConfig::default())
    }

    #[tokio::test]
    async fn test_update_los_angeles_requires_document() {
        let client = client();
        let err = update_los_angeles(&client).await.unwrap_err();
        assert!(err.is_not_found());

        set_los_angeles(&client).await.unwrap();
        update_los_angeles(&client).await.unwrap();
        touch_los_angeles(&client).await.unwrap();

        let la = client.get_document(CITIES, "LA").await.unwrap();
        let data = la.data().unwrap();
        assert_eq!(data["state"], json!("DC"));
        assert_eq!(data["country"], json!("USA"));
        assert!(data["lastUpdated"].is_string());
    }

    #[tokio::test]
    async fn test_update_frank() {
        let client = client();
        update_frank(&client).await.unwrap();

        let frank = client.get_document(USERS, "frank").await.unwrap();
        assert_eq!(
            serde_json::Value::Object(frank.data().unwrap().clone()),
            json!({
                "name": "Frank",
                "favorites": {"food": "Pizza", "color": "Red", "subject": "recess"},
                "age": 13
            })
        );
    }

    #[tokio::test]
    async fn test_increment_population_missing_field() {
        let client = client();
        client
            .set_document(CITIES, "SF", &json!({"name": "San Francisco"}))
            .await
            .unwrap();

        let err = increment_population(&client, "SF").await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_increment_population_at_integer_limit() {
        let client = client();
        client
            .set_document(CITIES, "SF", &json!({"population": i64::MAX}))
            .await
            .unwrap();

        let err = increment_population(&client, "SF").await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        let snap = get_san_francisco(&client).await.unwrap();
        assert_eq!(snap.data().unwrap()["population"], json!(i64::MAX));
    }

    #[tokio::test]
    async fn test_add_and_list_users() {
        let client = client();
        add_user(&client).await.unwrap();
        add_user(&client).await.unwrap();

        let users = list_users(&client).await.unwrap();
        assert_eq!(users.len(), 2);
        assert!(users.iter().all(|u| u.data().unwrap()["last"] == json!("Turing")));
    }

    #[tokio::test]
    async fn test_get_and_delete_missing() {
        let client = client();
        assert!(!get_san_francisco(&client).await.unwrap().exists());
        delete_washington(&client).await.unwrap();
    }
}
