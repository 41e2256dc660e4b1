//! Restaurant front-desk tools: menu lookup, ordering, order status, and
//! table reservations.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{Tool, ToolContext};

/// Dish name and its dietary tags.
type Dish = (&'static str, &'static [&'static str]);

const MENU: &[(&str, &[Dish])] = &[
    (
        "Appetizers",
        &[
            ("Punugulu (Lentil Fritters)", &["veg", "contains_gluten"]),
            ("Mirapakaya Bajji (Chilli Fritters)", &["veg", "contains_gluten"]),
            ("Chicken 65", &["non-veg", "contains_gluten"]),
            ("Royyala Vepudu (Prawn Fry)", &["non-veg", "gluten-free", "nut-free"]),
            ("Mokka Jonna Garelu (Corn Vada)", &["veg", "gluten-free", "nut-free"]),
        ],
    ),
    (
        "Main Course - Rice",
        &[
            ("Steamed Rice (Annam)", &["veg", "vegan", "gluten-free", "nut-free"]),
            ("Gongura Pulihora (Sorrel Leaf Rice)", &["veg", "vegan", "gluten-free"]),
            ("Tomato Rice", &["veg", "vegan", "gluten-free"]),
            ("Andhra Chicken Biryani", &["non-veg", "gluten-free"]),
            ("Mutton Biryani", &["non-veg", "gluten-free"]),
        ],
    ),
    (
        "Main Course - Breads",
        &[
            ("Plain Roti/Chapati", &["veg", "vegan", "contains_gluten", "nut-free"]),
            ("Pesarattu (Moong Dal Dosa)", &["veg", "vegan", "gluten-free", "nut-free"]),
            ("Dibba Rotti (Rice & Lentil Pancake)", &["veg", "vegan", "gluten-free", "nut-free"]),
        ],
    ),
    (
        "Curries (Veg)",
        &[
            ("Gutti Vankaya Kura (Stuffed Brinjal)", &["veg", "vegan", "gluten-free", "contains_nuts"]),
            ("Bendakaya Fry (Okra Fry)", &["veg", "vegan", "gluten-free", "nut-free"]),
            ("Tomato Pappu (Tomato Dal)", &["veg", "vegan", "gluten-free", "nut-free"]),
            ("Palakura Pappu (Spinach Dal)", &["veg", "vegan", "gluten-free", "nut-free"]),
        ],
    ),
    (
        "Curries (Non-Veg)",
        &[
            ("Andhra Kodi Kura (Chicken Curry)", &["non-veg", "gluten-free", "nut-free"]),
            ("Gongura Mamsam (Mutton with Sorrel Leaves)", &["non-veg", "gluten-free", "nut-free"]),
            ("Chepala Pulusu (Fish Tamarind Curry)", &["non-veg", "gluten-free", "nut-free"]),
        ],
    ),
    (
        "Dessert",
        &[
            ("Semiya Payasam (Vermicelli Kheer)", &["veg", "contains_gluten", "contains_dairy", "contains_nuts"]),
            ("Double Ka Meetha (Bread Pudding)", &["veg", "contains_gluten", "contains_dairy", "contains_nuts"]),
            ("Poornam Boorelu", &["veg", "contains_dairy", "gluten-free", "nut-free"]),
            ("Fresh Fruit Salad", &["veg", "vegan", "gluten-free", "nut-free"]),
        ],
    ),
];

/// Whether a dish survives all requested restrictions.
fn allowed(tags: &[&str], restrictions: &[String]) -> bool {
    restrictions.iter().all(|r| match r.as_str() {
        "vegetarian" => !tags.contains(&"non-veg"),
        "vegan" => !tags.contains(&"non-veg") && !tags.contains(&"contains_dairy"),
        "gluten-free" => !tags.contains(&"contains_gluten"),
        "nut-free" => !tags.contains(&"contains_nuts"),
        _ => true,
    })
}

pub struct GetMenuTool;

#[async_trait]
impl Tool for GetMenuTool {
    fn name(&self) -> &str {
        "get_menu"
    }

    fn description(&self) -> &str {
        "Get the restaurant menu by course, optionally filtered by dietary restrictions \
         (vegetarian, vegan, gluten-free, nut-free)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "dietary_restrictions": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Restrictions to filter by, e.g. [\"vegan\", \"nut-free\"]"
                }
            }
        })
    }

    async fn execute(&self, params: Value, _context: &ToolContext) -> anyhow::Result<Value> {
        let restrictions: Vec<String> = params
            .get("dietary_restrictions")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.trim().to_lowercase())
                    .collect()
            })
            .unwrap_or_default();

        let courses: Vec<Value> = MENU
            .iter()
            .filter_map(|(course, dishes)| {
                let items: Vec<Value> = dishes
                    .iter()
                    .filter(|(_, tags)| allowed(tags, &restrictions))
                    .map(|(name, tags)| json!({ "name": name, "tags": tags }))
                    .collect();
                (!items.is_empty()).then(|| json!({ "course": course, "items": items }))
            })
            .collect();

        Ok(json!({ "menu": courses }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Received,
    Preparing,
    Ready,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub name: String,
    #[serde(default = "one")]
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub items: Vec<OrderItem>,
    pub order_type: String,
    pub table_number: Option<String>,
    pub status: OrderStatus,
}

impl Order {
    fn summary(&self) -> String {
        self.items
            .iter()
            .map(|i| format!("{} x {}", i.quantity, i.name))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Orders kept before the oldest are forgotten.
pub const MAX_ORDERS: usize = 1000;

struct OrderBookInner {
    next_id: u64,
    capacity: usize,
    orders: HashMap<String, Order>,
    /// Ids in placement order.
    placed: VecDeque<String>,
}

impl Default for OrderBookInner {
    fn default() -> Self {
        Self {
            next_id: 0,
            capacity: MAX_ORDERS,
            orders: HashMap::new(),
            placed: VecDeque::new(),
        }
    }
}

impl OrderBookInner {
    /// Drop the oldest completed order, or the oldest order if none is completed.
    fn evict_one(&mut self) {
        let index = self
            .placed
            .iter()
            .position(|id| {
                self.orders
                    .get(id)
                    .is_some_and(|o| o.status == OrderStatus::Completed)
            })
            .unwrap_or(0);
        if let Some(id) = self.placed.remove(index) {
            self.orders.remove(&id);
            debug!(order_id = %id, "Order book full, forgetting order");
        }
    }
}

/// In-memory orders shared by the ordering tools, bounded to the most
/// recent [`MAX_ORDERS`].
#[derive(Clone, Default)]
pub struct OrderBook {
    inner: Arc<Mutex<OrderBookInner>>,
}

impl OrderBook {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(OrderBookInner {
                capacity: capacity.max(1),
                ..OrderBookInner::default()
            })),
        }
    }

    pub async fn place(&self, order: Order) -> String {
        let mut inner = self.inner.lock().await;
        while inner.orders.len() >= inner.capacity {
            inner.evict_one();
        }
        inner.next_id += 1;
        let id = format!("ORDER-{}", inner.next_id);
        inner.orders.insert(id.clone(), order);
        inner.placed.push_back(id.clone());
        id
    }

    pub async fn get(&self, id: &str) -> Option<Order> {
        self.inner.lock().await.orders.get(id).cloned()
    }

    /// Advance an order, e.g. when the kitchen reports progress.
    pub async fn set_status(&self, id: &str, status: OrderStatus) -> bool {
        match self.inner.lock().await.orders.get_mut(id) {
            Some(order) => {
                order.status = status;
                true
            }
            None => false,
        }
    }
}

pub struct PlaceOrderTool {
    orders: OrderBook,
}

impl PlaceOrderTool {
    pub fn new(orders: OrderBook) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl Tool for PlaceOrderTool {
    fn name(&self) -> &str {
        "place_order"
    }

    fn description(&self) -> &str {
        "Place a food order. Returns the order id to read back to the caller."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": { "type": "string" },
                            "quantity": { "type": "integer" },
                            "notes": { "type": "string" }
                        },
                        "required": ["name"]
                    }
                },
                "order_type": {
                    "type": "string",
                    "description": "dine-in, takeout or delivery (default dine-in)"
                },
                "table_number": { "type": "string" }
            },
            "required": ["items"]
        })
    }

    async fn execute(&self, params: Value, context: &ToolContext) -> anyhow::Result<Value> {
        let items: Vec<OrderItem> = match params.get("items") {
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| anyhow::anyhow!("invalid 'items' parameter: {e}"))?,
            None => Vec::new(),
        };
        if items.is_empty() {
            anyhow::bail!("cannot place an empty order");
        }

        let order_type = params
            .get("order_type")
            .and_then(|v| v.as_str())
            .unwrap_or("dine-in")
            .to_string();
        let table_number = params.get("table_number").and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

        let mut message = String::from("Thank you! Your order has been placed.");
        let order = Order {
            items,
            order_type: order_type.clone(),
            table_number: table_number.clone(),
            status: OrderStatus::Received,
        };
        let order_id = self.orders.place(order).await;
        message.push_str(&format!(" Your order ID is {order_id}."));
        match (order_type.as_str(), table_number) {
            ("dine-in", Some(table)) => {
                message.push_str(&format!(" It will be delivered to table {table}."))
            }
            ("takeout", _) => message.push_str(" We will let you know when it's ready for pickup."),
            _ => {}
        }

        info!(session_id = %context.session_id, %order_id, "Order placed");
        Ok(json!({ "order_id": order_id, "message": message }))
    }
}

pub struct CheckOrderStatusTool {
    orders: OrderBook,
}

impl CheckOrderStatusTool {
    pub fn new(orders: OrderBook) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl Tool for CheckOrderStatusTool {
    fn name(&self) -> &str {
        "check_order_status"
    }

    fn description(&self) -> &str {
        "Check the status of a previously placed order by its order id."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "order_id": { "type": "string", "description": "Id returned by place_order" }
            },
            "required": ["order_id"]
        })
    }

    async fn execute(&self, params: Value, _context: &ToolContext) -> anyhow::Result<Value> {
        let order_id = params
            .get("order_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing 'order_id' parameter"))?;

        let order = self
            .orders
            .get(order_id)
            .await
            .ok_or_else(|| anyhow::anyhow!("order {order_id} not found"))?;

        let items = order.summary();
        let message = match order.status {
            OrderStatus::Received => {
                format!("Your order ({items}) has been received and is being sent to the kitchen.")
            }
            OrderStatus::Preparing => {
                format!("Your order ({items}) is being prepared in the kitchen.")
            }
            OrderStatus::Ready => format!("Good news! Your order ({items}) is ready."),
            OrderStatus::Completed => format!("Your order ({items}) was completed."),
        };

        Ok(json!({ "order_status": order.status, "message": message }))
    }
}

pub struct BookReservationTool;

#[async_trait]
impl Tool for BookReservationTool {
    fn name(&self) -> &str {
        "book_restaurant_reservation"
    }

    fn description(&self) -> &str {
        "Book a table. Date as YYYY-MM-DD, time as HH:MM (24h)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "date": { "type": "string", "description": "YYYY-MM-DD" },
                "time": { "type": "string", "description": "HH:MM, 24-hour clock" },
                "no_of_people": { "type": "integer" },
                "notes": { "type": "string" }
            },
            "required": ["date", "time", "no_of_people"]
        })
    }

    async fn execute(&self, params: Value, context: &ToolContext) -> anyhow::Result<Value> {
        let date = params
            .get("date")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing 'date' parameter"))?;
        let time = params
            .get("time")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing 'time' parameter"))?;

        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|_| anyhow::anyhow!("invalid date format, use YYYY-MM-DD"))?;
        let time = NaiveTime::parse_from_str(time, "%H:%M")
            .map_err(|_| anyhow::anyhow!("invalid time format, use HH:MM"))?;

        // Models sometimes send integers as floats or strings.
        let people = match params.get("no_of_people") {
            Some(Value::Number(n)) => n.as_f64().map(|f| f as i64),
            Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
        .filter(|&n| n > 0)
        .ok_or_else(|| anyhow::anyhow!("number of people must be a positive integer"))?;

        let notes = params
            .get("notes")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty());

        let reservation_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_uppercase();
        let mut message = format!(
            "Reservation confirmed for {people} people on {} at {}.",
            date.format("%Y-%m-%d"),
            time.format("%H:%M")
        );
        if let Some(notes) = notes {
            message.push_str(&format!(" Notes: {notes}"));
        }

        info!(session_id = %context.session_id, %reservation_id, "Reservation booked");
        Ok(json!({ "reservation_id": reservation_id, "message": message }))
    }
}
