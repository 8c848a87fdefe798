use lapin::BasicProperties;

/// A message received from the broker, either fetched or pushed to a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// The delivery tag of the message, scoped to the channel it was received on.
    pub delivery_tag: u64,

    /// The exchange of the message. May be an empty string
    /// if the default exchange is used.
    pub exchange: String,

    /// The routing key of the message. May be an empty string
    /// if no routing key is specified.
    pub routing_key: String,

    /// Whether this message was redelivered
    pub redelivered: bool,

    /// Contains the properties and the headers of the
    /// message.
    pub properties: BasicProperties,

    /// The payload of the message in binary format.
    pub body: Vec<u8>,
}

impl From<lapin::message::Delivery> for Delivery {
    fn from(value: lapin::message::Delivery) -> Self {
        // Acknowledgements go through the owning channel, not the acker.
        Self {
            delivery_tag: value.delivery_tag,
            exchange: value.exchange.as_str().to_owned(),
            routing_key: value.routing_key.as_str().to_owned(),
            redelivered: value.redelivered,
            properties: value.properties,
            body: value.data,
        }
    }
}
