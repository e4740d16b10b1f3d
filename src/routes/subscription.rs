use axum::{
    extract::{rejection::FormRejection, Path, Query, State},
    response::{IntoResponse, Response},
    Form, Json,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::SubscribeFlow;
use crate::models::plan::Plan;
use crate::models::subscription::{BillingPeriod, Subscription, SubscriptionError};
use crate::models::user::User;
use crate::responses::{see_other, JsonResponse};
use crate::routes::auth::{AuthUser, MaybeAuthUser};
use crate::services::billing::BillingError;
use crate::state::AppState;
use crate::utils::csrf::{
    generate_csrf_token, subscribe_scope, verify_csrf_token, CANCEL_SCOPE, PORTAL_SCOPE,
    RENEW_SCOPE, RESUME_SCOPE,
};
use crate::utils::flash::{set_flash, take_flash, Flash};

pub const SUBSCRIBE_PATH: &str = "/subscription/subscribe";
pub const MANAGE_PATH: &str = "/subscription/manage";

const INVALID_CSRF: &str = "Invalid CSRF token.";
const GENERIC_FAILURE: &str = "Something went wrong. Please try again.";

#[derive(Debug, Deserialize)]
pub struct SubscribePageQuery {
    #[serde(rename = "checkoutCancelled")]
    checkout_cancelled: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PlanView {
    #[serde(flatten)]
    pub plan: Plan,
    pub csrf_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionView {
    #[serde(flatten)]
    pub subscription: Subscription,
    pub is_cancelling: bool,
}

impl From<Subscription> for SubscriptionView {
    fn from(subscription: Subscription) -> Self {
        let is_cancelling = subscription.is_cancelling();
        Self {
            subscription,
            is_cancelling,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubscribePage {
    pub plans: Vec<PlanView>,
    pub user_plan: Option<Plan>,
    pub user_subscription: Option<SubscriptionView>,
    pub manage_url: &'static str,
    pub checkout_cancelled: bool,
    pub flash: Option<Flash>,
}

#[derive(Debug, Serialize)]
pub struct ManageTokens {
    pub cancel: String,
    pub renew: String,
    pub portal: String,
}

#[derive(Debug, Serialize)]
pub struct ManagePage {
    pub subscription: SubscriptionView,
    pub plan: Option<Plan>,
    pub csrf: ManageTokens,
    pub flash: Option<Flash>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubscribeForm {
    plan_id: Option<String>,
    billing_period: Option<String>,
    #[serde(rename = "_token")]
    token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ActionForm {
    #[serde(rename = "_token")]
    token: Option<String>,
    reason: Option<String>,
}

/// A missing or non-form body reads as an empty form; the CSRF check then
/// rejects it.
fn form_or_default<T: Default>(form: Result<Form<T>, FormRejection>) -> T {
    form.map(|Form(inner)| inner).unwrap_or_default()
}

fn redirect_with(jar: CookieJar, flash: Flash, location: &str) -> Response {
    (set_flash(jar, &flash), see_other(location)).into_response()
}

fn csrf_ok(state: &AppState, user: &User, scope: &str, token: Option<&str>) -> bool {
    verify_csrf_token(&state.config.csrf_secret, user.id, scope, token)
}

fn token_for(state: &AppState, user: &User, scope: &str) -> String {
    generate_csrf_token(&state.config.csrf_secret, user.id, scope)
}

/// GET /subscription/subscribe
pub async fn subscribe_page(
    State(state): State<AppState>,
    MaybeAuthUser(user): MaybeAuthUser,
    Query(query): Query<SubscribePageQuery>,
    jar: CookieJar,
) -> Response {
    let plans = match state.plans.list_plans().await {
        Ok(plans) => plans,
        Err(err) => {
            error!(?err, "failed to list plans");
            return JsonResponse::server_error("Failed to load plans");
        }
    };

    let subscription = match &user {
        Some(user) => match state.subscriptions.find_by_user(user.id).await {
            Ok(sub) => sub,
            Err(err) => {
                error!(?err, user_id = %user.id, "failed to load subscription");
                return JsonResponse::server_error("Failed to load subscription");
            }
        },
        None => None,
    };
    let user_plan = subscription
        .as_ref()
        .and_then(|sub| plans.iter().find(|p| p.id == sub.plan_id).cloned());

    let plans = plans
        .into_iter()
        .map(|plan| {
            let csrf_token = user
                .as_ref()
                .map(|u| token_for(&state, u, &subscribe_scope(plan.id)));
            PlanView { plan, csrf_token }
        })
        .collect();

    let checkout_cancelled = query
        .checkout_cancelled
        .as_deref()
        .is_some_and(|v| !matches!(v, "" | "0" | "false"));

    let (jar, flash) = take_flash(jar);
    let page = SubscribePage {
        plans,
        user_plan,
        user_subscription: subscription.map(SubscriptionView::from),
        manage_url: MANAGE_PATH,
        checkout_cancelled,
        flash,
    };
    (jar, Json(page)).into_response()
}

/// POST /subscription/subscribe/plan/{plan_id}
pub async fn subscribe_to_plan(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(plan_id): Path<String>,
    jar: CookieJar,
    form: Result<Form<SubscribeForm>, FormRejection>,
) -> Response {
    let form = form_or_default(form);
    subscribe_inner(&state, &user, &plan_id, &form, jar).await
}

/// POST /subscription/subscribe with `plan_id` in the form.
pub async fn subscribe(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    jar: CookieJar,
    form: Result<Form<SubscribeForm>, FormRejection>,
) -> Response {
    let form = form_or_default(form);
    let plan_id = form.plan_id.clone().unwrap_or_default();
    subscribe_inner(&state, &user, &plan_id, &form, jar).await
}

async fn subscribe_inner(
    state: &AppState,
    user: &User,
    raw_plan_id: &str,
    form: &SubscribeForm,
    jar: CookieJar,
) -> Response {
    let plan_id = Uuid::parse_str(raw_plan_id.trim()).ok();
    let token_valid = plan_id.is_some_and(|id| {
        csrf_ok(state, user, &subscribe_scope(id), form.token.as_deref())
    });
    let Some(plan_id) = plan_id.filter(|_| token_valid) else {
        warn!(user_id = %user.id, "subscribe rejected: invalid csrf token");
        return JsonResponse::forbidden(INVALID_CSRF);
    };

    let Some(period) = form
        .billing_period
        .as_deref()
        .and_then(|p| p.parse::<BillingPeriod>().ok())
    else {
        return redirect_with(jar, Flash::error("Invalid billing period."), SUBSCRIBE_PATH);
    };

    let plan = match state.plans.find_plan(plan_id).await {
        Ok(Some(plan)) => plan,
        Ok(None) => {
            return redirect_with(
                jar,
                Flash::error("Selected plan does not exist."),
                SUBSCRIBE_PATH,
            )
        }
        Err(err) => {
            error!(?err, %plan_id, "failed to load plan");
            return redirect_with(jar, Flash::error(GENERIC_FAILURE), SUBSCRIBE_PATH);
        }
    };

    match state.subscriptions.find_by_user(user.id).await {
        Ok(None) => {}
        Ok(Some(_)) => {
            return redirect_with(
                jar,
                Flash::error(SubscriptionError::AlreadySubscribed.to_string()),
                SUBSCRIBE_PATH,
            )
        }
        Err(err) => {
            error!(?err, user_id = %user.id, "failed to load subscription");
            return redirect_with(jar, Flash::error(GENERIC_FAILURE), SUBSCRIBE_PATH);
        }
    }

    match state.config.subscribe_flow {
        SubscribeFlow::Checkout => start_checkout(state, user, &plan, period, jar).await,
        SubscribeFlow::Direct => create_directly(state, user, &plan, period, jar).await,
    }
}

async fn start_checkout(
    state: &AppState,
    user: &User,
    plan: &Plan,
    period: BillingPeriod,
    jar: CookieJar,
) -> Response {
    match state
        .billing_gateway()
        .create_checkout_session(user, plan, period)
        .await
    {
        Ok(redirect) => (jar, see_other(&redirect.url)).into_response(),
        Err(BillingError::InvalidLookupKey) => redirect_with(
            jar,
            Flash::error(BillingError::InvalidLookupKey.to_string()),
            SUBSCRIBE_PATH,
        ),
        Err(err) => {
            error!(?err, user_id = %user.id, plan_id = %plan.id, "failed to start checkout");
            redirect_with(
                jar,
                Flash::error("Unable to start checkout. Please try again."),
                SUBSCRIBE_PATH,
            )
        }
    }
}

async fn create_directly(
    state: &AppState,
    user: &User,
    plan: &Plan,
    period: BillingPeriod,
    jar: CookieJar,
) -> Response {
    match state
        .subscription_service()
        .create_subscription(user.id, plan.id, period, Utc::now())
        .await
    {
        Ok(_) => redirect_with(
            jar,
            Flash::success("Your subscription is now active."),
            MANAGE_PATH,
        ),
        Err(err @ SubscriptionError::AlreadySubscribed) => {
            redirect_with(jar, Flash::error(err.to_string()), SUBSCRIBE_PATH)
        }
        Err(err) => {
            error!(?err, user_id = %user.id, plan_id = %plan.id, "failed to create subscription");
            redirect_with(jar, Flash::error(GENERIC_FAILURE), SUBSCRIBE_PATH)
        }
    }
}

/// GET /subscription/manage
pub async fn manage(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    jar: CookieJar,
) -> Response {
    let subscription = match state.subscriptions.find_by_user(user.id).await {
        Ok(Some(sub)) => sub,
        Ok(None) => {
            return redirect_with(
                jar,
                Flash::error("You do not have an active subscription to manage."),
                SUBSCRIBE_PATH,
            )
        }
        Err(err) => {
            error!(?err, user_id = %user.id, "failed to load subscription");
            return JsonResponse::server_error("Failed to load subscription");
        }
    };

    let plan = match state.plans.find_plan(subscription.plan_id).await {
        Ok(plan) => plan,
        Err(err) => {
            error!(?err, plan_id = %subscription.plan_id, "failed to load plan");
            None
        }
    };

    let (jar, flash) = take_flash(jar);
    let page = ManagePage {
        subscription: subscription.into(),
        plan,
        csrf: ManageTokens {
            cancel: token_for(&state, &user, CANCEL_SCOPE),
            renew: token_for(&state, &user, RENEW_SCOPE),
            portal: token_for(&state, &user, PORTAL_SCOPE),
        },
        flash,
    };
    (jar, Json(page)).into_response()
}

/// Guards shared by every management POST: the user must own a subscription
/// and present a token for `scope`.
async fn guard_action(
    state: &AppState,
    user: &User,
    scope: &str,
    token: Option<&str>,
    missing_msg: &str,
) -> Result<(), Response> {
    match state.subscriptions.find_by_user(user.id).await {
        Ok(Some(_)) => {}
        Ok(None) => return Err(JsonResponse::forbidden(missing_msg)),
        Err(err) => {
            error!(?err, user_id = %user.id, "failed to load subscription");
            return Err(JsonResponse::server_error("Failed to load subscription"));
        }
    }
    if !csrf_ok(state, user, scope, token) {
        warn!(user_id = %user.id, scope, "management action rejected: invalid csrf token");
        return Err(JsonResponse::forbidden(INVALID_CSRF));
    }
    Ok(())
}

fn transition_response(
    result: Result<Subscription, SubscriptionError>,
    user: &User,
    success_msg: &str,
    jar: CookieJar,
) -> Response {
    match result {
        Ok(_) => redirect_with(jar, Flash::success(success_msg), MANAGE_PATH),
        Err(err @ SubscriptionError::InvalidStatus { .. }) => {
            redirect_with(jar, Flash::error(err.to_string()), MANAGE_PATH)
        }
        Err(SubscriptionError::NotFound) => {
            JsonResponse::forbidden("You do not have a subscription.")
        }
        Err(err) => {
            error!(?err, user_id = %user.id, "subscription transition failed");
            redirect_with(jar, Flash::error(GENERIC_FAILURE), MANAGE_PATH)
        }
    }
}

/// POST /subscription/cancel
pub async fn cancel(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    jar: CookieJar,
    form: Result<Form<ActionForm>, FormRejection>,
) -> Response {
    let form = form_or_default(form);
    if let Err(resp) = guard_action(
        &state,
        &user,
        CANCEL_SCOPE,
        form.token.as_deref(),
        "You do not have a subscription to cancel.",
    )
    .await
    {
        return resp;
    }

    let result = state
        .subscription_service()
        .cancel_subscription(user.id, form.reason.as_deref())
        .await;
    transition_response(result, &user, "Your subscription has been canceled.", jar)
}

async fn renew_with_scope(
    state: AppState,
    user: User,
    scope: &str,
    form: ActionForm,
    jar: CookieJar,
) -> Response {
    if let Err(resp) = guard_action(
        &state,
        &user,
        scope,
        form.token.as_deref(),
        "You do not have a subscription to renew.",
    )
    .await
    {
        return resp;
    }

    let result = state.subscription_service().renew_subscription(user.id).await;
    transition_response(result, &user, "Your subscription has been resumed.", jar)
}

/// POST /subscription/renew
pub async fn renew(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    jar: CookieJar,
    form: Result<Form<ActionForm>, FormRejection>,
) -> Response {
    let form = form_or_default(form);
    renew_with_scope(state, user, RENEW_SCOPE, form, jar).await
}

/// POST /subscription/resume
pub async fn resume(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    jar: CookieJar,
    form: Result<Form<ActionForm>, FormRejection>,
) -> Response {
    let form = form_or_default(form);
    renew_with_scope(state, user, RESUME_SCOPE, form, jar).await
}

/// POST /subscription/portal
pub async fn billing_portal(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    jar: CookieJar,
    form: Result<Form<ActionForm>, FormRejection>,
) -> Response {
    let form = form_or_default(form);
    if !csrf_ok(&state, &user, PORTAL_SCOPE, form.token.as_deref()) {
        return JsonResponse::forbidden(INVALID_CSRF);
    }

    match state
        .billing_gateway()
        .create_billing_portal_session(&user)
        .await
    {
        Ok(url) => {
            info!(user_id = %user.id, "billing portal session created");
            (jar, see_other(&url)).into_response()
        }
        Err(err @ BillingError::MissingCustomer) => {
            redirect_with(jar, Flash::error(err.to_string()), MANAGE_PATH)
        }
        Err(err) => {
            error!(?err, user_id = %user.id, "failed to open billing portal");
            redirect_with(jar, Flash::error(GENERIC_FAILURE), MANAGE_PATH)
        }
    }
}
