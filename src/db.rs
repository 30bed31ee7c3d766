use log::info;
use mongodb::bson::{doc, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Collection, Database, IndexModel};

use crate::models::{Cart, Message, Order, Product, User};

pub const USERS: &str = "users";
pub const PRODUCTS: &str = "products";
pub const CARTS: &str = "carts";
pub const ORDERS: &str = "orders";
pub const MESSAGES: &str = "messages";

pub struct MongoDB {
    pub client: Client,
    pub db: Database,
}

impl MongoDB {
    pub async fn init(uri: &str, db_name: &str) -> mongodb::error::Result<Self> {
        let mut client_options = ClientOptions::parse(uri).await?;
        client_options.app_name = Some("shopline".to_string());
        let client = Client::with_options(client_options)?;
        let db = client.database(db_name);
        Ok(MongoDB { client, db })
    }

    pub fn users(&self) -> Collection<User> {
        self.db.collection(USERS)
    }

    pub fn products(&self) -> Collection<Product> {
        self.db.collection(PRODUCTS)
    }

    pub fn carts(&self) -> Collection<Cart> {
        self.db.collection(CARTS)
    }

    pub fn orders(&self) -> Collection<Order> {
        self.db.collection(ORDERS)
    }

    pub fn messages(&self) -> Collection<Message> {
        self.db.collection(MESSAGES)
    }

    /// Untyped handle for aggregation pipelines.
    pub fn raw(&self, name: &str) -> Collection<Document> {
        self.db.collection(name)
    }

    pub async fn ensure_indexes(&self) -> mongodb::error::Result<()> {
        let unique = || IndexOptions::builder().unique(true).build();

        self.users()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "email": 1 })
                    .options(unique())
                    .build(),
            )
            .await?;
        self.carts()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "user_id": 1 })
                    .options(unique())
                    .build(),
            )
            .await?;
        self.orders()
            .create_index(IndexModel::builder().keys(doc! { "user_id": 1, "created_at": -1 }).build())
            .await?;
        self.products()
            .create_index(IndexModel::builder().keys(doc! { "category": 1, "price": 1 }).build())
            .await?;
        self.messages()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "conversation_key": 1, "created_at": -1 })
                    .build(),
            )
            .await?;
        self.messages()
            .create_index(IndexModel::builder().keys(doc! { "receiver_id": 1, "is_read": 1 }).build())
            .await?;

        info!("MongoDB indexes ensured");
        Ok(())
    }
}

/// True when the write failed on a unique index.
pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == 11000,
        _ => false,
    }
}
