//! Collection and field name constants.

/// User profiles, keyed by identity.
pub const USERS_COLLECTION: &str = "users";

/// Product listings created by farmers.
pub const PRODUCTS_COLLECTION: &str = "products";

/// Orders placed by customers against farmer listings.
pub const ORDERS_COLLECTION: &str = "orders";

/// Payment history entries.
pub const PAYMENTS_COLLECTION: &str = "payments";

/// Customer feedback on orders.
pub const FEEDBACKS_COLLECTION: &str = "feedbacks";

// =============================================================================
// Owner Reference Fields
// =============================================================================

/// Identity of the farmer owning a product or fulfilling an order.
pub const FARMER_ID_FIELD: &str = "farmerId";

/// Identity of the customer who placed an order or left feedback.
pub const CUSTOMER_ID_FIELD: &str = "customerId";

/// Identity of the payer or payee of a payment.
pub const USER_ID_FIELD: &str = "userId";

// =============================================================================
// Profile Fields
// =============================================================================

pub const PHONE_FIELD: &str = "phone";
pub const ROLE_FIELD: &str = "role";
pub const UID_FIELD: &str = "uid";
pub const CREATED_AT_FIELD: &str = "createdAt";
pub const IS_NEW_USER_FIELD: &str = "isNewUser";

/// Set on a recovered profile, naming the identity it was recovered from.
pub const MIGRATED_FROM_FIELD: &str = "migratedFrom";
pub const RECOVERED_AT_FIELD: &str = "recoveredAt";

/// Set on an orphan profile once a recovery has claimed it.
pub const MIGRATED_TO_FIELD: &str = "migratedTo";
pub const MIGRATED_AT_FIELD: &str = "migratedAt";
