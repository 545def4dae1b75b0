diesel::table! {
    addresses (id) {
        id -> Uuid,
        user_id -> Uuid,
        label -> Nullable<Varchar>,
        recipient -> Varchar,
        street -> Varchar,
        city -> Varchar,
        state -> Nullable<Varchar>,
        postal_code -> Varchar,
        country -> Varchar,
        is_default -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        deleted_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    brands (id) {
        id -> Uuid,
        name -> Varchar,
        slug -> Varchar,
        description -> Nullable<Text>,
        logo_url -> Nullable<Text>,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        deleted_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    categories (id) {
        id -> Uuid,
        parent_id -> Nullable<Uuid>,
        name -> Varchar,
        slug -> Varchar,
        description -> Nullable<Text>,
        image_url -> Nullable<Text>,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        deleted_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    discount_brands (discount_id, brand_id) {
        discount_id -> Uuid,
        brand_id -> Uuid,
    }
}

diesel::table! {
    discount_categories (discount_id, category_id) {
        discount_id -> Uuid,
        category_id -> Uuid,
    }
}

diesel::table! {
    discount_products (discount_id, product_id) {
        discount_id -> Uuid,
        product_id -> Uuid,
    }
}

diesel::table! {
    discounts (id) {
        id -> Uuid,
        code -> Varchar,
        description -> Nullable<Text>,
        discount_type -> Varchar,
        value -> Numeric,
        min_order_amount -> Nullable<Numeric>,
        max_uses -> Nullable<Int4>,
        used_count -> Int4,
        starts_at -> Timestamptz,
        ends_at -> Nullable<Timestamptz>,
        is_active -> Bool,
        applies_to_all -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        deleted_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    favorites (user_id, product_id) {
        user_id -> Uuid,
        product_id -> Uuid,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    media_folders (id) {
        id -> Uuid,
        parent_id -> Nullable<Uuid>,
        name -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        deleted_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    media_items (id) {
        id -> Uuid,
        folder_id -> Nullable<Uuid>,
        file_name -> Varchar,
        url -> Text,
        mime_type -> Varchar,
        size_bytes -> Int8,
        alt_text -> Nullable<Varchar>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        deleted_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    order_items (id) {
        id -> Uuid,
        order_id -> Uuid,
        product_id -> Uuid,
        quantity -> Int4,
        unit_price -> Numeric,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        deleted_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    orders (id) {
        id -> Uuid,
        user_id -> Uuid,
        address_id -> Nullable<Uuid>,
        discount_id -> Nullable<Uuid>,
        status -> Varchar,
        total_amount -> Numeric,
        discount_amount -> Numeric,
        total_items -> Int4,
        notes -> Nullable<Text>,
        placed_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        deleted_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    outbox_events (id) {
        id -> Uuid,
        aggregate_id -> Uuid,
        event_type -> Varchar,
        event_data -> Jsonb,
        processed -> Bool,
        created_at -> Timestamptz,
        processed_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    price_groups (id) {
        id -> Uuid,
        name -> Varchar,
        description -> Nullable<Text>,
        price -> Numeric,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        deleted_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    product_media (product_id, media_id) {
        product_id -> Uuid,
        media_id -> Uuid,
        position -> Int4,
    }
}

diesel::table! {
    products (id) {
        id -> Uuid,
        category_id -> Nullable<Uuid>,
        brand_id -> Nullable<Uuid>,
        price_group_id -> Nullable<Uuid>,
        name -> Varchar,
        slug -> Varchar,
        sku -> Nullable<Varchar>,
        description -> Nullable<Text>,
        price -> Numeric,
        stock -> Int4,
        is_active -> Bool,
        is_featured -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        deleted_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    reviews (id) {
        id -> Uuid,
        user_id -> Uuid,
        product_id -> Uuid,
        rating -> Int4,
        comment -> Nullable<Text>,
        is_approved -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        deleted_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    users (id) {
        id -> Uuid,
        email -> Varchar,
        full_name -> Nullable<Varchar>,
        phone -> Nullable<Varchar>,
        role -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        deleted_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(addresses -> users (user_id));
diesel::joinable!(discount_brands -> brands (brand_id));
diesel::joinable!(discount_brands -> discounts (discount_id));
diesel::joinable!(discount_categories -> categories (category_id));
diesel::joinable!(discount_categories -> discounts (discount_id));
diesel::joinable!(discount_products -> discounts (discount_id));
diesel::joinable!(discount_products -> products (product_id));
diesel::joinable!(favorites -> products (product_id));
diesel::joinable!(favorites -> users (user_id));
diesel::joinable!(media_items -> media_folders (folder_id));
diesel::joinable!(order_items -> orders (order_id));
diesel::joinable!(order_items -> products (product_id));
diesel::joinable!(orders -> addresses (address_id));
diesel::joinable!(orders -> discounts (discount_id));
diesel::joinable!(orders -> users (user_id));
diesel::joinable!(product_media -> media_items (media_id));
diesel::joinable!(product_media -> products (product_id));
diesel::joinable!(products -> brands (brand_id));
diesel::joinable!(products -> categories (category_id));
diesel::joinable!(products -> price_groups (price_group_id));
diesel::joinable!(reviews -> products (product_id));
diesel::joinable!(reviews -> users (user_id));

diesel::allow_tables_to_appear_in_same_query!(
    addresses,
    brands,
    categories,
    discount_brands,
    discount_categories,
    discount_products,
    discounts,
    favorites,
    media_folders,
    media_items,
    order_items,
    orders,
    outbox_events,
    price_groups,
    product_media,
    products,
    reviews,
    users,
);
